use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use parking_lot::RwLock;
use xxhash_rust::xxh3::xxh3_64;

use crate::tprintln;

use super::principal::Principal;

pub type SessionToken = String;

/// Time source for session issue/expiry decisions. Injected so expiry is
/// deterministic under test; production uses `SystemClock`.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 { chrono::Utc::now().timestamp_millis() }
}

/// Manually advanced clock for expiry-sensitive tests.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start_ms: i64) -> Self { Self(AtomicI64::new(start_ms)) }
    pub fn advance(&self, d: Duration) { self.0.fetch_add(d.as_millis() as i64, Ordering::SeqCst); }
    pub fn set(&self, ms: i64) { self.0.store(ms, Ordering::SeqCst); }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 { self.0.load(Ordering::SeqCst) }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub ttl: Duration,
    /// When set, every authorized guard check refreshes expiry (sliding
    /// window). Off by default: a login is good for exactly `ttl`.
    pub sliding: bool,
    /// When set, a new login revokes the subject's earlier sessions.
    pub single_session_per_subject: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(60 * 60), sliding: false, single_session_per_subject: false }
    }
}

/// One session record. `token` is the only key; `(subject_id, role)` inside
/// the principal never changes after creation, and `revoked` never resets.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub principal: Principal,
    /// Per-session CSRF secret for cookie-carried mutations.
    pub csrf: String,
    pub issued_at_ms: i64,
    pub expires_at_ms: i64,
    pub revoked: bool,
}

impl Session {
    pub fn is_expired(&self, now_ms: i64) -> bool { now_ms >= self.expires_at_ms }
    pub fn is_valid(&self, now_ms: i64) -> bool { !self.revoked && !self.is_expired(now_ms) }
}

struct Shard {
    map: RwLock<HashMap<SessionToken, Session>>,
}

const N_SHARDS: usize = 64;

fn gen_token() -> String {
    // 256-bit random token base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).expect("system entropy source");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn gen_csrf() -> String {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).expect("system entropy source");
    let mut out = String::with_capacity(64);
    use std::fmt::Write as _;
    for b in &buf { let _ = write!(&mut out, "{:02x}", b); }
    out
}

/// Sharded, injectable session store. Operations on one token serialize
/// through that token's shard lock; different tokens land on different
/// shards and proceed independently. The subject index is a secondary map
/// and is never held together with a shard lock.
pub struct SessionStore {
    shards: Vec<Shard>,
    subject_index: RwLock<HashMap<String, HashSet<SessionToken>>>,
    cfg: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(cfg: SessionConfig) -> Self { Self::with_clock(cfg, Arc::new(SystemClock)) }

    pub fn with_clock(cfg: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let mut shards = Vec::with_capacity(N_SHARDS);
        for _ in 0..N_SHARDS { shards.push(Shard { map: RwLock::new(HashMap::new()) }); }
        Self { shards, subject_index: RwLock::new(HashMap::new()), cfg, clock }
    }

    pub fn config(&self) -> &SessionConfig { &self.cfg }
    pub fn now_ms(&self) -> i64 { self.clock.now_ms() }

    #[inline]
    fn shard_idx(token: &str) -> usize { (xxh3_64(token.as_bytes()) as usize) & (N_SHARDS - 1) }

    /// Mint a fresh session. Always succeeds; tokens are never reused, so a
    /// shard collision (256-bit) just regenerates.
    pub fn create(&self, principal: Principal) -> Session {
        if self.cfg.single_session_per_subject {
            self.revoke_subject(&principal.subject_id);
        }
        let now = self.clock.now_ms();
        let ttl_ms = self.cfg.ttl.as_millis() as i64;
        loop {
            let token = gen_token();
            let sess = Session {
                token: token.clone(),
                principal: principal.clone(),
                csrf: gen_csrf(),
                issued_at_ms: now,
                expires_at_ms: now + ttl_ms,
                revoked: false,
            };
            let si = Self::shard_idx(&token);
            {
                let mut m = self.shards[si].map.write();
                if m.contains_key(&token) { continue; }
                m.insert(token.clone(), sess.clone());
            }
            self.subject_index
                .write()
                .entry(principal.subject_id.clone())
                .or_insert_with(HashSet::new)
                .insert(token);
            tprintln!("session.create subject={} role={} ttl_secs={}", principal.subject_id, principal.role, self.cfg.ttl.as_secs());
            return sess;
        }
    }

    /// Return the record as-is; validity is the caller's check. Unknown
    /// tokens thus stay distinguishable from known-but-dead ones for audit.
    pub fn lookup(&self, token: &str) -> Option<Session> {
        let si = Self::shard_idx(token);
        self.shards[si].map.read().get(token).cloned()
    }

    /// Extend expiry to now + TTL iff the session is currently valid.
    /// Revoked or already-expired sessions are untouched.
    pub fn refresh(&self, token: &str) -> bool {
        let now = self.clock.now_ms();
        let ttl_ms = self.cfg.ttl.as_millis() as i64;
        let si = Self::shard_idx(token);
        let mut m = self.shards[si].map.write();
        match m.get_mut(token) {
            Some(sess) if sess.is_valid(now) => {
                sess.expires_at_ms = now + ttl_ms;
                true
            }
            _ => false,
        }
    }

    /// Mark revoked. Idempotent and safe on unknown tokens; returns whether
    /// this call flipped the flag.
    pub fn revoke(&self, token: &str) -> bool {
        let si = Self::shard_idx(token);
        let mut m = self.shards[si].map.write();
        match m.get_mut(token) {
            Some(sess) if !sess.revoked => {
                sess.revoked = true;
                true
            }
            _ => false,
        }
    }

    /// Revoke every session of a subject. Logins racing this call may still
    /// complete; this is an administrative action, not a barrier.
    pub fn revoke_subject(&self, subject_id: &str) -> usize {
        let tokens: Vec<SessionToken> = match self.subject_index.read().get(subject_id) {
            Some(set) => set.iter().cloned().collect(),
            None => return 0,
        };
        let mut count = 0usize;
        for t in &tokens {
            if self.revoke(t) { count += 1; }
        }
        tprintln!("session.revoke_subject subject={} count={}", subject_id, count);
        count
    }

    /// Drop expired and revoked records. Storage reclaim only; validity
    /// decisions never depend on the sweep having run.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed: Vec<(String, SessionToken)> = Vec::new();
        for shard in &self.shards {
            let mut m = shard.map.write();
            let dead: Vec<SessionToken> = m
                .iter()
                .filter(|(_, s)| s.revoked || s.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            for k in dead {
                if let Some(s) = m.remove(&k) {
                    removed.push((s.principal.subject_id, k));
                }
            }
        }
        if !removed.is_empty() {
            let mut idx = self.subject_index.write();
            for (subject, token) in &removed {
                let now_empty = match idx.get_mut(subject) {
                    Some(set) => {
                        set.remove(token);
                        set.is_empty()
                    }
                    None => false,
                };
                if now_empty { idx.remove(subject); }
            }
        }
        removed.len()
    }

    /// Point-in-time copy of every record, live or dead, for admin listings.
    pub fn snapshot(&self) -> Vec<Session> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.map.read().values().cloned());
        }
        out
    }

    pub fn active_count(&self) -> usize {
        let now = self.clock.now_ms();
        self.shards
            .iter()
            .map(|s| s.map.read().values().filter(|v| v.is_valid(now)).count())
            .sum()
    }
}
