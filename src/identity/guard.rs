use std::sync::Arc;

use crate::routes;

use super::authorizer::{Role, RoleRegistry};
use super::request_context::RequestContext;
use super::session::SessionStore;

/// Outcome of guarding one request. `Unauthenticated` covers both "no token
/// presented" and "token we have no record of"; `Invalid` covers tokens we
/// do know but that are revoked or expired. Clients receive the same
/// challenge for both, the split exists for server-side logs.
#[derive(Debug, Clone)]
pub enum Access {
    Authorized { ctx: RequestContext },
    Unauthenticated,
    Invalid,
    Forbidden { role: Role },
}

impl Access {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Access::Authorized { .. })
    }
}

/// Per-request decision point: resolves the presented token to a session,
/// checks liveness, then asks the registry whether the session's role may
/// enter the path. Authentication is always settled before authorization,
/// so a revoked admin and a revoked viewer are indistinguishable.
pub struct RouteGuard {
    sessions: Arc<SessionStore>,
    registry: Arc<RoleRegistry>,
}

impl RouteGuard {
    pub fn new(sessions: Arc<SessionStore>, registry: Arc<RoleRegistry>) -> Self {
        Self { sessions, registry }
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub fn check(&self, token: Option<&str>, path: &str) -> Access {
        let path = routes::normalize_path(path);
        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => {
                tracing::debug!(path = %path, "denied: no session token presented");
                return Access::Unauthenticated;
            }
        };
        let session = match self.sessions.lookup(token) {
            Some(s) => s,
            None => {
                tracing::debug!(path = %path, "denied: unknown session token");
                return Access::Unauthenticated;
            }
        };
        if session.revoked {
            tracing::debug!(path = %path, subject = %session.principal.subject_id, "denied: session revoked");
            return Access::Invalid;
        }
        if session.is_expired(self.sessions.now_ms()) {
            tracing::debug!(path = %path, subject = %session.principal.subject_id, "denied: session expired");
            return Access::Invalid;
        }
        if !self.registry.permits(session.principal.role, &path) {
            tracing::debug!(path = %path, subject = %session.principal.subject_id, role = %session.principal.role, "denied: role not granted");
            return Access::Forbidden { role: session.principal.role };
        }
        if self.sessions.config().sliding {
            // Under the sliding policy every authorized request pushes the
            // expiry out. Refresh re-checks validity under the shard lock,
            // so a concurrent revoke still wins.
            self.sessions.refresh(token);
        }
        Access::Authorized { ctx: RequestContext::new(session.principal, path) }
    }
}
