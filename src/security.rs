use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use polars::prelude::*;
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{SaltString, PasswordHash};
use chrono::{TimeZone, Utc};
use once_cell::sync::Lazy;
use unicode_normalization::UnicodeNormalization;

use crate::identity::{Role, VerifiedUser};

/// One row of the user table, as surfaced to administrators. Password
/// hashes stay inside this module.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UserRecord {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

fn users_path(db_root: &str) -> PathBuf { Path::new(db_root).join("users.parquet") }

fn mk_schema_df() -> DataFrame {
    let user_ids: Series = Series::new("user_id".into(), Vec::<String>::new());
    let usernames: Series = Series::new("username".into(), Vec::<String>::new());
    let display_names: Series = Series::new("display_name".into(), Vec::<String>::new());
    let hashes: Series = Series::new("password_hash".into(), Vec::<String>::new());
    let roles: Series = Series::new("role".into(), Vec::<String>::new());
    let created: Series = Series::new("created_at".into(), Vec::<i64>::new());
    let updated: Series = Series::new("updated_at".into(), Vec::<i64>::new());
    DataFrame::new(vec![user_ids.into(), usernames.into(), display_names.into(), hashes.into(), roles.into(), created.into(), updated.into()]).unwrap()
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

// Verified against when the username is unknown, so a miss takes one
// argon2 verification just like a wrong password does.
static DUMMY_PHC: Lazy<String> = Lazy::new(|| hash_password("portico").unwrap_or_default());

/// Login names are compared after trim, NFC normalization and lowercasing,
/// so " Alice " and "alice" address the same account.
pub fn normalize_username(raw: &str) -> String {
    raw.trim().nfc().collect::<String>().to_lowercase()
}

fn read_users(path: &Path) -> Result<DataFrame> {
    if !path.exists() { return Ok(mk_schema_df()); }
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    Ok(df)
}

fn write_users(path: &Path, mut df: DataFrame) -> Result<()> {
    if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
    // Ensure columns exist with correct dtypes
    let expected = mk_schema_df();
    for name in expected.get_column_names() {
        if !df.get_column_names().iter().any(|n| n.as_str() == name.as_str()) {
            // add empty default column
            let s = expected.column(name.as_str()).unwrap().clone();
            df.with_column(s)?;
        }
    }
    let mut f = std::fs::File::create(path)?;
    ParquetWriter::new(&mut f).finish(&mut df)?;
    Ok(())
}

fn cell_str(df: &DataFrame, name: &str, i: usize) -> Result<String> {
    Ok(match df.column(name)?.get(i)? {
        AnyValue::String(s) => s.to_string(),
        AnyValue::StringOwned(s) => s.to_string(),
        _ => String::new(),
    })
}

fn fmt_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339(),
        None => ms.to_string(),
    }
}

/// Seed the user table with an `admin` account on first boot. The password
/// comes from PORTICO_ADMIN_PASSWORD, falling back to "portico".
pub fn ensure_default_admin(db_root: &str) -> Result<()> {
    let p = users_path(db_root);
    if p.exists() { return Ok(()); }
    let password = std::env::var("PORTICO_ADMIN_PASSWORD").unwrap_or_else(|_| "portico".to_string());
    upsert_user(db_root, "admin", "Portico Admin", &password, Role::Admin)
}

/// Create or replace the account for `username`. Replacing keeps the stable
/// user id and creation stamp; only the secret, display name and role move.
pub fn upsert_user(db_root: &str, username: &str, display_name: &str, password: &str, role: Role) -> Result<()> {
    use polars::prelude::{AnyValue, BooleanType, ChunkedArray};
    let username = normalize_username(username);
    if username.is_empty() { return Err(anyhow!("username must not be empty")); }
    let p = users_path(db_root);
    let mut df = read_users(&p)?;
    let mut user_id = String::new();
    let mut created_at = 0i64;
    for i in 0..df.height() {
        let uname = df.column("username")?.get(i)?;
        let name_matches = match uname {
            AnyValue::String(s) => s == username.as_str(),
            AnyValue::StringOwned(ref s) => s.as_str() == username.as_str(),
            _ => false,
        };
        if name_matches {
            user_id = cell_str(&df, "user_id", i)?;
            created_at = df.column("created_at")?.i64()?.get(i).unwrap_or(0);
            break;
        }
    }
    let now = Utc::now().timestamp_millis();
    if user_id.is_empty() {
        user_id = uuid::Uuid::new_v4().to_string();
        created_at = now;
    }
    // Filter out any existing row(s) for this username
    if df.height() > 0 {
        let user_s = df.column("username")?.clone();
        if let Some(series) = user_s.as_series() {
            let mask: ChunkedArray<BooleanType> = series.iter().map(|av| match av {
                AnyValue::String(s) => s != username.as_str(),
                AnyValue::StringOwned(s) => s.as_str() != username.as_str(),
                _ => true,
            }).collect();
            df = df.filter(&mask)?;
        }
    }
    let hash = hash_password(password)?;
    // Append row
    let new = DataFrame::new(vec![
        Series::new("user_id".into(), vec![user_id]).into(),
        Series::new("username".into(), vec![username]).into(),
        Series::new("display_name".into(), vec![display_name.to_string()]).into(),
        Series::new("password_hash".into(), vec![hash]).into(),
        Series::new("role".into(), vec![role.as_str().to_string()]).into(),
        Series::new("created_at".into(), vec![created_at]).into(),
        Series::new("updated_at".into(), vec![now]).into(),
    ])?;
    if df.height() == 0 { write_users(&p, new) } else { let stacked = df.vstack(&new)?; write_users(&p, stacked) }
}

pub fn alter_user(db_root: &str, username: &str, new_password: Option<&str>, new_role: Option<Role>) -> Result<()> {
    use polars::prelude::{AnyValue, BooleanType, ChunkedArray};
    let username = normalize_username(username);
    let p = users_path(db_root);
    let mut df = read_users(&p)?;
    if df.height() == 0 { return Err(anyhow!("user not found")); }
    // Capture current row values by scanning
    let mut found = false;
    let mut user_id = String::new();
    let mut display_name = String::new();
    let mut cur_hash = String::new();
    let mut cur_role = String::new();
    let mut created_at = 0i64;
    for i in 0..df.height() {
        let uname = df.column("username")?.get(i)?;
        let name_matches = match uname {
            AnyValue::String(s) => s == username.as_str(),
            AnyValue::StringOwned(ref s) => s.as_str() == username.as_str(),
            _ => false,
        };
        if name_matches {
            found = true;
            user_id = cell_str(&df, "user_id", i)?;
            display_name = cell_str(&df, "display_name", i)?;
            cur_hash = cell_str(&df, "password_hash", i)?;
            cur_role = cell_str(&df, "role", i)?;
            created_at = df.column("created_at")?.i64()?.get(i).unwrap_or(0);
            break;
        }
    }
    if !found { return Err(anyhow!("user not found")); }

    let new_hash = if let Some(pw) = new_password { hash_password(pw)? } else { cur_hash };
    let role_str = match new_role { Some(r) => r.as_str().to_string(), None => cur_role };

    // Remove all existing rows for this username
    let user_s = df.column("username")?.clone();
    if let Some(series) = user_s.as_series() {
        let keep_mask: ChunkedArray<BooleanType> = series.iter().map(|av| match av {
            AnyValue::String(s) => s != username.as_str(),
            AnyValue::StringOwned(s) => s.as_str() != username.as_str(),
            _ => true,
        }).collect();
        df = df.filter(&keep_mask)?;
    }

    // Append updated row
    let updated = DataFrame::new(vec![
        Series::new("user_id".into(), vec![user_id]).into(),
        Series::new("username".into(), vec![username]).into(),
        Series::new("display_name".into(), vec![display_name]).into(),
        Series::new("password_hash".into(), vec![new_hash]).into(),
        Series::new("role".into(), vec![role_str]).into(),
        Series::new("created_at".into(), vec![created_at]).into(),
        Series::new("updated_at".into(), vec![Utc::now().timestamp_millis()]).into(),
    ])?;
    if df.height() == 0 { write_users(&p, updated) } else { let stacked = df.vstack(&updated)?; write_users(&p, stacked) }
}

/// Removing an absent user is a successful no-op.
pub fn delete_user(db_root: &str, username: &str) -> Result<()> {
    use polars::prelude::{AnyValue, BooleanType, ChunkedArray};
    let username = normalize_username(username);
    let p = users_path(db_root);
    let mut df = read_users(&p)?;
    if df.height() == 0 { return Ok(()); }
    // Build mask of rows to keep
    let user_s = df.column("username")?.clone();
    if let Some(series) = user_s.as_series() {
        let mask: ChunkedArray<BooleanType> = series.iter().map(|av| match av {
            AnyValue::String(s) => s != username.as_str(),
            AnyValue::StringOwned(s) => s.as_str() != username.as_str(),
            _ => true,
        }).collect();
        df = df.filter(&mask)?;
    }
    write_users(&p, df)
}

pub fn list_users(db_root: &str) -> Result<Vec<UserRecord>> {
    let df = read_users(&users_path(db_root))?;
    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let role_raw = cell_str(&df, "role", i)?;
        let role = match Role::parse(&role_raw) {
            Some(r) => r,
            None => {
                tracing::warn!(role = %role_raw, "skipping user row with unknown role");
                continue;
            }
        };
        out.push(UserRecord {
            user_id: cell_str(&df, "user_id", i)?,
            username: cell_str(&df, "username", i)?,
            display_name: cell_str(&df, "display_name", i)?,
            role,
            created_at: fmt_ms(df.column("created_at")?.i64()?.get(i).unwrap_or(0)),
            updated_at: fmt_ms(df.column("updated_at")?.i64()?.get(i).unwrap_or(0)),
        });
    }
    Ok(out)
}

/// Check `password` for `username` against the user table. `Ok(None)` covers
/// both unknown users and wrong passwords; callers cannot tell which.
pub fn authenticate(db_root: &str, username: &str, password: &str) -> Result<Option<VerifiedUser>> {
    use polars::prelude::AnyValue;
    let username = normalize_username(username);
    let p = users_path(db_root);
    let df = read_users(&p)?;
    for i in 0..df.height() {
        let uname = df.column("username")?.get(i)?;
        let matches = match uname {
            AnyValue::String(s) => s == username.as_str(),
            AnyValue::StringOwned(ref s) => s.as_str() == username.as_str(),
            _ => false,
        };
        if matches {
            let hash = cell_str(&df, "password_hash", i)?;
            if !verify_password(&hash, password) { return Ok(None); }
            let role_raw = cell_str(&df, "role", i)?;
            let role = match Role::parse(&role_raw) {
                Some(r) => r,
                None => {
                    tracing::warn!(username = %username, role = %role_raw, "user row carries unknown role, refusing login");
                    return Ok(None);
                }
            };
            let user_id = cell_str(&df, "user_id", i)?;
            return Ok(Some(VerifiedUser { subject_id: user_id, username, role }));
        }
    }
    let _ = verify_password(&DUMMY_PHC, password);
    Ok(None)
}
