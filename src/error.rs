//! Unified application error model and mapping helpers.
//! This module provides a common error enum used across frontends (HTTP, WebSocket)
//! and the identity modules, along with the HTTP status mapping.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    InvalidCredentials { code: String, message: String },
    Unauthenticated { code: String, message: String },
    Forbidden { code: String, message: String },
    UpstreamTimeout { code: String, message: String },
    Upstream { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::InvalidCredentials { code, .. }
            | AppError::Unauthenticated { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::UpstreamTimeout { code, .. }
            | AppError::Upstream { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::InvalidCredentials { message, .. }
            | AppError::Unauthenticated { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::UpstreamTimeout { message, .. }
            | AppError::Upstream { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn unauthenticated<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Unauthenticated { code: code.into(), message: msg.into() } }
    pub fn forbidden<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn upstream_timeout<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::UpstreamTimeout { code: code.into(), message: msg.into() } }
    pub fn upstream<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Upstream { code: code.into(), message: msg.into() } }
    pub fn internal<C: Into<String>, M: Into<String>>(code: C, msg: M) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Always the same code and message. Wrong password and unknown user
    /// must be byte-identical on the wire.
    pub fn invalid_credentials() -> Self {
        AppError::InvalidCredentials {
            code: "invalid_credentials".into(),
            message: "invalid username or password".into(),
        }
    }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::InvalidCredentials { .. } => 401,
            AppError::Unauthenticated { .. } => 401,
            AppError::Forbidden { .. } => 403,
            AppError::UpstreamTimeout { .. } => 504,
            AppError::Upstream { .. } => 502,
            AppError::Internal { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless downcasted elsewhere
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(AppError::user("bad_input", "oops").http_status(), 400);
        assert_eq!(AppError::invalid_credentials().http_status(), 401);
        assert_eq!(AppError::unauthenticated("unauthenticated", "login first").http_status(), 401);
        assert_eq!(AppError::forbidden("forbidden", "wrong role").http_status(), 403);
        assert_eq!(AppError::upstream_timeout("verify_timeout", "slow directory").http_status(), 504);
        assert_eq!(AppError::upstream("directory_unavailable", "io").http_status(), 502);
        assert_eq!(AppError::internal("internal", "panic").http_status(), 500);
    }

    #[test]
    fn display_carries_code_and_message() {
        let e = AppError::forbidden("forbidden", "admin area");
        assert_eq!(e.to_string(), "forbidden: admin area");
        assert_eq!(e.code_str(), "forbidden");
        assert_eq!(e.message(), "admin area");
    }

    #[test]
    fn anyhow_defaults_to_internal() {
        let e: AppError = anyhow::anyhow!("boom").into();
        assert_eq!(e.http_status(), 500);
        assert_eq!(e.code_str(), "internal");
    }

    #[test]
    fn invalid_credentials_never_varies() {
        let a = AppError::invalid_credentials();
        let b = AppError::invalid_credentials();
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(a.code_str(), "invalid_credentials");
    }
}
