//! Session store behavior: issuance, lookup, refresh, revocation, expiry
//! and sweeping, including the refresh/revoke race.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use portico::identity::{ManualClock, Principal, Role, SessionConfig, SessionStore};

const T0: i64 = 1_700_000_000_000;

fn viewer(subject: &str, username: &str) -> Principal {
    Principal::new(subject, username, Role::Viewer)
}

fn cfg_secs(ttl_secs: u64) -> SessionConfig {
    SessionConfig { ttl: Duration::from_secs(ttl_secs), ..SessionConfig::default() }
}

fn store_at(start_ms: i64, cfg: SessionConfig) -> (Arc<SessionStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let store = Arc::new(SessionStore::with_clock(cfg, clock.clone()));
    (store, clock)
}

#[test]
fn create_then_lookup_roundtrip() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let sess = store.create(viewer("u-alice", "alice"));
    assert!(!sess.token.is_empty(), "token must be minted");
    assert!(!sess.csrf.is_empty(), "csrf must be minted");
    assert_eq!(sess.issued_at_ms, T0);
    assert_eq!(sess.expires_at_ms, T0 + 60_000, "expiry is issuance plus TTL");

    let got = store.lookup(&sess.token).expect("lookup of fresh token");
    assert_eq!(got.token, sess.token);
    assert_eq!(got.principal.subject_id, "u-alice");
    assert_eq!(got.principal.role, Role::Viewer);
    assert!(got.is_valid(store.now_ms()), "fresh session must be valid");
    Ok(())
}

#[test]
fn tokens_never_repeat_across_sessions() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let mut seen = HashSet::new();
    for i in 0..200 {
        let sess = store.create(viewer(&format!("u-{}", i % 7), "bulk"));
        assert!(seen.insert(sess.token.clone()), "token repeated at iteration {}", i);
    }
    Ok(())
}

#[test]
fn unknown_token_lookup_is_none() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    store.create(viewer("u-alice", "alice"));
    assert!(store.lookup("no-such-token").is_none(), "unknown token must miss");
    Ok(())
}

#[test]
fn lookup_returns_dead_records_unfiltered() -> Result<()> {
    let (store, clock) = store_at(T0, cfg_secs(60));
    let revoked = store.create(viewer("u-a", "a"));
    let expired = store.create(viewer("u-b", "b"));
    store.revoke(&revoked.token);
    clock.advance(Duration::from_secs(60));

    // The store reports the record as-is; callers decide validity. This is
    // what lets the audit trail distinguish "unknown token" from
    // "known but revoked/expired".
    let r = store.lookup(&revoked.token).expect("revoked record still visible");
    assert!(r.revoked);
    let e = store.lookup(&expired.token).expect("expired record still visible");
    assert!(!e.revoked);
    assert!(e.is_expired(store.now_ms()));
    Ok(())
}

#[test]
fn revoke_is_idempotent_and_sticky() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let sess = store.create(viewer("u-alice", "alice"));
    assert!(store.revoke(&sess.token), "first revoke flips the flag");
    assert!(!store.revoke(&sess.token), "second revoke is a no-op");
    assert!(!store.revoke("no-such-token"), "unknown token revoke is a no-op");
    let got = store.lookup(&sess.token).expect("record survives revocation");
    assert!(got.revoked);
    assert!(!got.is_valid(store.now_ms()));
    Ok(())
}

#[test]
fn refresh_extends_a_live_session() -> Result<()> {
    let (store, clock) = store_at(T0, cfg_secs(60));
    let sess = store.create(viewer("u-alice", "alice"));
    clock.advance(Duration::from_secs(30));
    assert!(store.refresh(&sess.token), "live session refreshes");
    let got = store.lookup(&sess.token).expect("lookup");
    assert_eq!(got.expires_at_ms, T0 + 30_000 + 60_000, "expiry restarts from now");

    // 80s after issue would have been past the original expiry
    clock.advance(Duration::from_secs(50));
    assert!(got.is_valid(store.now_ms()), "refreshed session outlives original expiry");
    Ok(())
}

#[test]
fn refresh_never_resurrects_a_revoked_session() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let sess = store.create(viewer("u-alice", "alice"));
    store.revoke(&sess.token);
    assert!(!store.refresh(&sess.token), "refresh after revoke must fail");
    let got = store.lookup(&sess.token).expect("lookup");
    assert!(got.revoked, "revocation is permanent");
    assert_eq!(got.expires_at_ms, T0 + 60_000, "expiry untouched by the failed refresh");
    Ok(())
}

#[test]
fn expired_session_is_invalid_and_not_refreshable() -> Result<()> {
    let (store, clock) = store_at(T0, cfg_secs(60));
    let sess = store.create(viewer("u-alice", "alice"));
    // Expiry boundary: a session is dead exactly at its expiry instant
    clock.advance(Duration::from_secs(60));
    let got = store.lookup(&sess.token).expect("lookup");
    assert!(got.is_expired(store.now_ms()));
    assert!(!got.is_valid(store.now_ms()));
    assert!(!store.refresh(&sess.token), "expired session must not refresh");
    Ok(())
}

#[test]
fn sweep_reclaims_dead_entries_without_changing_answers() -> Result<()> {
    let (store, clock) = store_at(T0, cfg_secs(60));
    let expired = store.create(viewer("u-a", "a"));
    let revoked = store.create(viewer("u-b", "b"));
    store.revoke(&revoked.token);
    clock.advance(Duration::from_secs(30));
    let live = store.create(viewer("u-c", "c"));
    clock.advance(Duration::from_secs(40)); // T0+70: first two expired, third alive

    assert_eq!(store.active_count(), 1);
    let removed = store.sweep();
    assert_eq!(removed, 2, "expired and revoked entries are reclaimed");

    // Dead tokens now miss entirely; the live one is untouched
    assert!(store.lookup(&expired.token).is_none());
    assert!(store.lookup(&revoked.token).is_none());
    let got = store.lookup(&live.token).expect("live session survives sweep");
    assert!(got.is_valid(store.now_ms()));
    assert_eq!(store.active_count(), 1, "sweep changes no validity verdict");
    assert_eq!(store.sweep(), 0, "second sweep finds nothing");
    Ok(())
}

#[test]
fn single_session_policy_revokes_the_earlier_login() -> Result<()> {
    let cfg = SessionConfig {
        ttl: Duration::from_secs(60),
        single_session_per_subject: true,
        ..SessionConfig::default()
    };
    let (store, _clock) = store_at(T0, cfg);
    let first = store.create(viewer("u-alice", "alice"));
    let other = store.create(viewer("u-bob", "bob"));
    let second = store.create(viewer("u-alice", "alice"));

    let got = store.lookup(&first.token).expect("lookup");
    assert!(got.revoked, "new login displaces the old session");
    assert!(store.lookup(&second.token).unwrap().is_valid(store.now_ms()));
    assert!(
        store.lookup(&other.token).unwrap().is_valid(store.now_ms()),
        "other subjects are unaffected"
    );
    Ok(())
}

#[test]
fn revoke_subject_kills_every_session_of_that_subject() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let a1 = store.create(viewer("u-alice", "alice"));
    let a2 = store.create(viewer("u-alice", "alice"));
    let a3 = store.create(viewer("u-alice", "alice"));
    let b = store.create(viewer("u-bob", "bob"));

    assert_eq!(store.revoke_subject("u-alice"), 3);
    for t in [&a1.token, &a2.token, &a3.token] {
        assert!(store.lookup(t).unwrap().revoked, "all of the subject's sessions die");
    }
    assert!(store.lookup(&b.token).unwrap().is_valid(store.now_ms()));
    assert_eq!(store.revoke_subject("u-alice"), 0, "second pass flips nothing");
    assert_eq!(store.revoke_subject("u-nobody"), 0, "unknown subject is a no-op");
    Ok(())
}

#[test]
fn concurrent_refresh_and_revoke_settles_revoked() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let sess = store.create(viewer("u-alice", "alice"));
    let token = sess.token.clone();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        let token = token.clone();
        handles.push(std::thread::spawn(move || {
            for _ in 0..500 {
                store.refresh(&token);
            }
        }));
    }
    let revoker = {
        let store = store.clone();
        let token = token.clone();
        std::thread::spawn(move || store.revoke(&token))
    };
    let flipped = revoker.join().expect("revoker thread");
    for h in handles {
        h.join().expect("refresher thread");
    }

    assert!(flipped, "exactly this call revoked the session");
    let got = store.lookup(&token).expect("lookup");
    assert!(got.revoked, "revocation wins over any concurrent refresh");
    assert!(!store.refresh(&token), "no refresh succeeds after the revoke settled");
    Ok(())
}

#[test]
fn snapshot_sees_every_record() -> Result<()> {
    let (store, _clock) = store_at(T0, cfg_secs(60));
    let s1 = store.create(viewer("u-a", "a"));
    let s2 = store.create(viewer("u-b", "b"));
    store.revoke(&s2.token);

    let snap = store.snapshot();
    assert_eq!(snap.len(), 2, "snapshot lists live and dead records");
    let tokens: HashSet<_> = snap.iter().map(|s| s.token.clone()).collect();
    assert!(tokens.contains(&s1.token) && tokens.contains(&s2.token));
    Ok(())
}
