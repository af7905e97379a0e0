//! Central identity, session and authorization management for Portico.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod gateway;
mod guard;
mod adapters;
mod request_context;
mod authorizer;

pub use principal::{Principal, Attrs};
pub use session::{Clock, SystemClock, ManualClock, Session, SessionToken, SessionConfig, SessionStore};
pub use provider::{Credentials, VerifiedUser, VerifyError, UserDirectory, LocalDirectory};
pub use gateway::{AuthGateway, LoginRequest, LoginResponse};
pub use guard::{Access, RouteGuard};
pub use adapters::{SessionInfo, SessionRow, to_session_info, to_session_row};
pub use request_context::RequestContext;
pub use authorizer::{Role, RoleRegistry};
