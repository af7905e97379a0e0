use async_trait::async_trait;
use thiserror::Error;

use super::authorizer::Role;

/// Identifier + secret as submitted to the login surface.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// What a directory answers on a successful verification. The subject id is
/// the stable identity a session binds to; the username is the login name
/// after normalization.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub subject_id: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// The user directory the gateway consults at login time only. Directories
/// are network collaborators in general, so the seam is async; the caller
/// owns the timeout.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn verify(&self, creds: &Credentials) -> Result<VerifiedUser, VerifyError>;
}

/// Directory backed by the local Parquet user table under `db_root`.
/// File IO is blocking, so verification runs on the blocking pool to keep
/// the gateway's timeout enforceable.
pub struct LocalDirectory {
    pub db_root: String,
}

impl LocalDirectory {
    pub fn new(db_root: impl Into<String>) -> Self { Self { db_root: db_root.into() } }
}

#[async_trait]
impl UserDirectory for LocalDirectory {
    async fn verify(&self, creds: &Credentials) -> Result<VerifiedUser, VerifyError> {
        let root = self.db_root.clone();
        let username = creds.username.clone();
        let password = creds.password.clone();
        let res = tokio::task::spawn_blocking(move || {
            crate::security::authenticate(&root, &username, &password)
        })
        .await
        .map_err(|e| VerifyError::Unavailable(e.to_string()))?;
        match res {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(VerifyError::InvalidCredentials),
            Err(e) => Err(VerifyError::Unavailable(e.to_string())),
        }
    }
}
