use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::session::Session;

/// Wire shape handed to the session owner at login and on `/session`.
/// Timestamps go out as RFC 3339 so browser clients do not juggle epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub subject: String,
    pub username: String,
    pub role: String,
    pub issued_at: String,
    pub expires_at: String,
}

/// Administrative listing row. The token never leaves the server whole,
/// only a short prefix so an operator can correlate against logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub token_prefix: String,
    pub subject: String,
    pub username: String,
    pub role: String,
    pub issued_at: String,
    pub expires_at: String,
    pub revoked: bool,
    pub expired: bool,
}

fn fmt_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(dt) => dt.to_rfc3339(),
        None => ms.to_string(),
    }
}

pub fn to_session_info(s: &Session) -> SessionInfo {
    SessionInfo {
        subject: s.principal.subject_id.clone(),
        username: s.principal.username.clone(),
        role: s.principal.role.to_string(),
        issued_at: fmt_ms(s.issued_at_ms),
        expires_at: fmt_ms(s.expires_at_ms),
    }
}

pub fn to_session_row(s: &Session, now_ms: i64) -> SessionRow {
    let prefix: String = s.token.chars().take(8).collect();
    SessionRow {
        token_prefix: prefix,
        subject: s.principal.subject_id.clone(),
        username: s.principal.username.clone(),
        role: s.principal.role.to_string(),
        issued_at: fmt_ms(s.issued_at_ms),
        expires_at: fmt_ms(s.expires_at_ms),
        revoked: s.revoked,
        expired: s.is_expired(now_ms),
    }
}
