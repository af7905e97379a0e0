use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::tprintln;

use super::principal::Principal;
use super::provider::{Credentials, UserDirectory, VerifyError};
use super::session::{Session, SessionStore};

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: Session,
}

/// Front door for session establishment and teardown. Owns the directory
/// timeout: a verification that outlives it is reported as an upstream
/// timeout, never as bad credentials, so callers can retry without fearing
/// lockout counters.
pub struct AuthGateway {
    directory: Arc<dyn UserDirectory>,
    sessions: Arc<SessionStore>,
    verify_timeout: Duration,
}

impl AuthGateway {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        sessions: Arc<SessionStore>,
        verify_timeout: Duration,
    ) -> Self {
        Self { directory, sessions, verify_timeout }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Verify credentials against the directory and mint a session on
    /// success. A failed or timed-out verification leaves the store
    /// untouched.
    pub async fn login(&self, req: LoginRequest) -> AppResult<LoginResponse> {
        let creds = Credentials { username: req.username.clone(), password: req.password };
        let verified = match tokio::time::timeout(self.verify_timeout, self.directory.verify(&creds)).await {
            Err(_elapsed) => {
                tracing::warn!(username = %req.username, timeout_ms = self.verify_timeout.as_millis() as u64, "directory verify timed out");
                return Err(AppError::upstream_timeout(
                    "verify_timeout",
                    "user directory did not answer in time",
                ));
            }
            Ok(Err(VerifyError::InvalidCredentials)) => {
                tprintln!("[auth] login rejected for '{}'", req.username);
                return Err(AppError::invalid_credentials());
            }
            Ok(Err(VerifyError::Unavailable(msg))) => {
                tracing::warn!(username = %req.username, error = %msg, "directory unavailable");
                return Err(AppError::upstream("directory_unavailable", msg));
            }
            Ok(Ok(v)) => v,
        };
        let mut principal = Principal::new(verified.subject_id, verified.username, verified.role);
        principal.attrs.ip = req.ip;
        let session = self.sessions.create(principal);
        tprintln!(
            "[auth] session issued for '{}' role={}",
            session.principal.username,
            session.principal.role
        );
        Ok(LoginResponse { session })
    }

    /// Revoke whatever the token names. Unknown, expired and already-revoked
    /// tokens all land in the same successful no-op, so the result discloses
    /// nothing about token validity.
    pub async fn logout(&self, token: &str) -> AppResult<()> {
        let revoked = self.sessions.revoke(token);
        if revoked {
            tprintln!("[auth] session revoked on logout");
        }
        Ok(())
    }
}
