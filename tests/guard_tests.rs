//! Route guard and auth gateway behavior: the role/section permission
//! matrix, the four access outcomes, sliding expiry, and the login
//! failure modes including directory timeouts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use portico::error::AppError;
use portico::identity::{
    Access, AuthGateway, Credentials, LoginRequest, ManualClock, Principal, Role, RoleRegistry,
    RouteGuard, SessionConfig, SessionStore, UserDirectory, VerifiedUser, VerifyError,
};

const T0: i64 = 1_700_000_000_000;

/// In-memory directory for gateway tests: fixed credentials, optional
/// artificial latency.
struct StaticDirectory {
    users: HashMap<String, (String, Role)>,
    delay: Option<Duration>,
}

impl StaticDirectory {
    fn with_users(users: &[(&str, &str, Role)]) -> Self {
        let map = users
            .iter()
            .map(|(u, p, r)| (u.to_string(), (p.to_string(), *r)))
            .collect();
        Self { users: map, delay: None }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl UserDirectory for StaticDirectory {
    async fn verify(&self, creds: &Credentials) -> Result<VerifiedUser, VerifyError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match self.users.get(&creds.username) {
            Some((pass, role)) if *pass == creds.password => Ok(VerifiedUser {
                subject_id: format!("u-{}", creds.username),
                username: creds.username.clone(),
                role: *role,
            }),
            _ => Err(VerifyError::InvalidCredentials),
        }
    }
}

fn store_with_clock(cfg: SessionConfig) -> (Arc<SessionStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let store = Arc::new(SessionStore::with_clock(cfg, clock.clone()));
    (store, clock)
}

fn guard_for(store: &Arc<SessionStore>) -> RouteGuard {
    RouteGuard::new(store.clone(), Arc::new(RoleRegistry::builtin()))
}

fn login_req(username: &str, password: &str) -> LoginRequest {
    LoginRequest { username: username.into(), password: password.into(), ip: None }
}

#[test]
fn builtin_registry_matrix() {
    let reg = RoleRegistry::builtin();

    for path in ["/admin", "/dashboard", "/agents", "/conversations", "/appointments", "/reports"] {
        assert!(reg.permits(Role::Admin, path), "admin must reach {}", path);
    }
    for path in ["/dashboard", "/agents", "/conversations", "/appointments", "/reports"] {
        assert!(reg.permits(Role::Operator, path), "operator must reach {}", path);
    }
    assert!(!reg.permits(Role::Operator, "/admin"), "operator is not an admin");

    for path in ["/dashboard", "/conversations", "/reports"] {
        assert!(reg.permits(Role::Viewer, path), "viewer must reach {}", path);
    }
    for path in ["/admin", "/agents", "/appointments"] {
        assert!(!reg.permits(Role::Viewer, path), "viewer must not reach {}", path);
    }
}

#[test]
fn registry_prefix_boundaries_and_case() {
    let reg = RoleRegistry::builtin();
    assert!(reg.permits(Role::Admin, "/admin/users"), "sub-path of a grant is covered");
    assert!(reg.permits(Role::Admin, "/admin/"), "trailing slash is normalized");
    assert!(!reg.permits(Role::Admin, "/administrator"), "prefix must stop at a segment boundary");
    assert!(!reg.permits(Role::Admin, "/Admin"), "matching is case-sensitive");
    // Answers are stable across repeated queries
    for _ in 0..50 {
        assert!(reg.permits(Role::Viewer, "/reports/weekly"));
        assert!(!reg.permits(Role::Viewer, "/agents"));
    }
}

#[test]
fn role_absent_from_the_table_permits_nothing() {
    let reg = RoleRegistry::from_grants(&[(Role::Admin, &["/admin"])]);
    assert!(!reg.permits(Role::Viewer, "/dashboard"));
    assert!(!reg.permits(Role::Viewer, "/"));
    assert!(!reg.permits(Role::Operator, "/admin"));
}

#[test]
fn role_names_parse_case_sensitively() {
    assert_eq!(Role::parse("admin"), Some(Role::Admin));
    assert_eq!(Role::parse("operator"), Some(Role::Operator));
    assert_eq!(Role::parse("viewer"), Some(Role::Viewer));
    assert_eq!(Role::parse("Admin"), None);
    assert_eq!(Role::parse("root"), None);
}

#[test]
fn guard_without_token_is_unauthenticated() {
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let guard = guard_for(&store);
    assert!(matches!(guard.check(None, "/dashboard"), Access::Unauthenticated));
    assert!(matches!(guard.check(Some(""), "/dashboard"), Access::Unauthenticated));
}

#[test]
fn guard_with_unknown_token_is_unauthenticated() {
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let guard = guard_for(&store);
    store.create(Principal::new("u-alice", "alice", Role::Viewer));
    assert!(matches!(
        guard.check(Some("forged-token"), "/dashboard"),
        Access::Unauthenticated
    ));
}

#[test]
fn guard_with_revoked_or_expired_token_is_invalid() {
    let cfg = SessionConfig { ttl: Duration::from_secs(60), ..SessionConfig::default() };
    let (store, clock) = store_with_clock(cfg);
    let guard = guard_for(&store);

    let revoked = store.create(Principal::new("u-a", "a", Role::Viewer));
    store.revoke(&revoked.token);
    assert!(matches!(guard.check(Some(&revoked.token), "/dashboard"), Access::Invalid));

    let expired = store.create(Principal::new("u-b", "b", Role::Viewer));
    clock.advance(Duration::from_secs(60));
    assert!(matches!(guard.check(Some(&expired.token), "/dashboard"), Access::Invalid));
}

#[test]
fn guard_checks_authentication_before_authorization() {
    // A revoked admin probing /admin must see Invalid, not Forbidden;
    // otherwise the answer would leak that the token was once privileged.
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let guard = guard_for(&store);
    let sess = store.create(Principal::new("u-root", "root", Role::Admin));
    store.revoke(&sess.token);
    assert!(matches!(guard.check(Some(&sess.token), "/admin"), Access::Invalid));
}

#[test]
fn guard_forbids_valid_session_outside_its_grants() {
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let guard = guard_for(&store);
    let sess = store.create(Principal::new("u-viewer", "viewer1", Role::Viewer));
    match guard.check(Some(&sess.token), "/admin") {
        Access::Forbidden { role } => assert_eq!(role, Role::Viewer),
        other => panic!("expected Forbidden, got {:?}", other),
    }
    // The denial does not damage the session
    assert!(matches!(guard.check(Some(&sess.token), "/reports"), Access::Authorized { .. }));
}

#[test]
fn guard_authorizes_and_builds_a_request_context() {
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let guard = guard_for(&store);
    let sess = store.create(Principal::new("u-op", "op1", Role::Operator));
    match guard.check(Some(&sess.token), "/agents/") {
        Access::Authorized { ctx } => {
            assert_eq!(ctx.principal.subject_id, "u-op");
            assert_eq!(ctx.path, "/agents", "path is normalized in the context");
            assert!(!ctx.request_id.is_empty());
        }
        other => panic!("expected Authorized, got {:?}", other),
    }
    // Repeatable across sections and requests
    for path in ["/dashboard", "/conversations", "/appointments", "/reports"] {
        assert!(matches!(guard.check(Some(&sess.token), path), Access::Authorized { .. }));
    }
}

#[test]
fn fixed_ttl_does_not_move_on_authorized_requests() {
    let cfg = SessionConfig { ttl: Duration::from_secs(60), sliding: false, ..SessionConfig::default() };
    let (store, clock) = store_with_clock(cfg);
    let guard = guard_for(&store);
    let sess = store.create(Principal::new("u-a", "a", Role::Viewer));
    clock.advance(Duration::from_secs(30));
    assert!(matches!(guard.check(Some(&sess.token), "/dashboard"), Access::Authorized { .. }));
    let got = store.lookup(&sess.token).unwrap();
    assert_eq!(got.expires_at_ms, T0 + 60_000, "fixed policy leaves expiry alone");
}

#[test]
fn sliding_ttl_moves_on_every_authorized_request() {
    let cfg = SessionConfig { ttl: Duration::from_secs(60), sliding: true, ..SessionConfig::default() };
    let (store, clock) = store_with_clock(cfg);
    let guard = guard_for(&store);
    let sess = store.create(Principal::new("u-a", "a", Role::Viewer));

    clock.advance(Duration::from_secs(40));
    assert!(matches!(guard.check(Some(&sess.token), "/dashboard"), Access::Authorized { .. }));
    clock.advance(Duration::from_secs(40));
    // 80s after issue: dead under the fixed policy, alive under sliding
    assert!(matches!(guard.check(Some(&sess.token), "/dashboard"), Access::Authorized { .. }));

    // A denial never slides the window
    assert!(matches!(guard.check(Some(&sess.token), "/admin"), Access::Forbidden { .. }));
    let expiry_after_denial = store.lookup(&sess.token).unwrap().expires_at_ms;
    assert_eq!(expiry_after_denial, T0 + 80_000 + 60_000);
}

#[tokio::test]
async fn login_success_creates_exactly_one_session() -> Result<()> {
    let dir = Arc::new(StaticDirectory::with_users(&[("alice", "s3cr3t!", Role::Viewer)]));
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let gw = AuthGateway::new(dir, store.clone(), Duration::from_secs(1));

    let resp = gw.login(login_req("alice", "s3cr3t!")).await?;
    assert_eq!(resp.session.principal.username, "alice");
    assert_eq!(resp.session.principal.role, Role::Viewer);
    assert_eq!(store.active_count(), 1);

    let guard = guard_for(&store);
    assert!(matches!(guard.check(Some(&resp.session.token), "/dashboard"), Access::Authorized { .. }));
    Ok(())
}

#[tokio::test]
async fn failed_login_leaves_the_store_untouched() -> Result<()> {
    let dir = Arc::new(StaticDirectory::with_users(&[("alice", "s3cr3t!", Role::Viewer)]));
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let gw = AuthGateway::new(dir, store.clone(), Duration::from_secs(1));

    let wrong_pass = gw.login(login_req("alice", "wrong")).await;
    assert!(matches!(wrong_pass, Err(AppError::InvalidCredentials { .. })));

    // Unknown user answers with the same variant as a wrong password
    let unknown_user = gw.login(login_req("mallory", "anything")).await;
    assert!(matches!(unknown_user, Err(AppError::InvalidCredentials { .. })));

    assert_eq!(store.active_count(), 0, "failed logins must not mint sessions");
    assert!(store.snapshot().is_empty());
    Ok(())
}

#[tokio::test]
async fn slow_directory_reports_a_timeout_not_bad_credentials() -> Result<()> {
    let dir = Arc::new(
        StaticDirectory::with_users(&[("alice", "s3cr3t!", Role::Viewer)])
            .slow(Duration::from_secs(5)),
    );
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let gw = AuthGateway::new(dir, store.clone(), Duration::from_millis(50));

    let res = gw.login(login_req("alice", "s3cr3t!")).await;
    match res {
        Err(AppError::UpstreamTimeout { .. }) => {}
        other => panic!("expected UpstreamTimeout, got {:?}", other),
    }
    assert_eq!(store.active_count(), 0, "timed-out login must not mint a session");
    Ok(())
}

#[tokio::test]
async fn logout_revokes_and_stays_successful_on_repeat() -> Result<()> {
    let dir = Arc::new(StaticDirectory::with_users(&[("alice", "s3cr3t!", Role::Viewer)]));
    let (store, _clock) = store_with_clock(SessionConfig::default());
    let gw = AuthGateway::new(dir, store.clone(), Duration::from_secs(1));
    let guard = guard_for(&store);

    let resp = gw.login(login_req("alice", "s3cr3t!")).await?;
    let token = resp.session.token.clone();
    assert!(matches!(guard.check(Some(&token), "/dashboard"), Access::Authorized { .. }));

    gw.logout(&token).await?;
    assert!(matches!(guard.check(Some(&token), "/dashboard"), Access::Invalid));

    // Second logout and logout of garbage both succeed silently
    gw.logout(&token).await?;
    gw.logout("never-issued").await?;
    Ok(())
}
