//! The server-side [`Session`] record and [`SessionCache`] (§3, §4.2).

use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, SystemTime},
};

use lru::LruCache;
use upspin_types::{Endpoint, UserName};

/// A bound session lifetime: tokens are minted good for 20 hours (§4.2).
pub const SESSION_LIFETIME: Duration = Duration::from_secs(20 * 60 * 60);

/// Default bound on the number of live sessions (§9.1 Open Question
/// resolution: fixed default, not configurable via the YAML config).
pub const DEFAULT_SESSION_CACHE_CAPACITY: usize = 10_000;

/// The server-side record of an authenticated client (§3).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub user: UserName,
    pub token: String,
    pub expiry: SystemTime,
    pub proxied_endpoint: Option<Endpoint>,
}

impl Session {
    pub fn is_valid(&self, now: SystemTime) -> bool {
        now < self.expiry
    }
}

/// The outcome of a [`SessionCache::lookup`], distinguishing a token that
/// isn't in the cache at all from one that's present but past its
/// [`Session::expiry`] (§4.2 step 1: these two cases carry different
/// `Permission` error strings — "user not authenticated" vs "auth token
/// expired" — and must not be collapsed together).
pub enum SessionLookup {
    Found(Session),
    Expired,
    NotFound,
}

/// A concurrent, LRU-bounded map from token string to [`Session`] (§3, §5).
///
/// Reads and writes take only a short in-memory lock; they never block on
/// network I/O, per §4.2's concurrency note.
pub struct SessionCache {
    inner: Mutex<LruCache<String, Session>>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        let capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Looks up `token`, distinguishing "not in the cache" from "in the
    /// cache but expired" (§4.2 step 1). Evicts the entry in the latter
    /// case.
    pub fn lookup(&self, token: &str, now: SystemTime) -> SessionLookup {
        let mut inner = self.inner.lock().expect("session cache lock poisoned");
        match inner.get(token) {
            Some(session) if session.is_valid(now) => SessionLookup::Found(session.clone()),
            Some(_) => {
                inner.pop(token);
                SessionLookup::Expired
            }
            None => SessionLookup::NotFound,
        }
    }

    /// Looks up `token`, evicting and returning `None` if it has expired.
    #[cfg(test)]
    fn get(&self, token: &str, now: SystemTime) -> Option<Session> {
        match self.lookup(token, now) {
            SessionLookup::Found(session) => Some(session),
            SessionLookup::Expired | SessionLookup::NotFound => None,
        }
    }

    pub fn insert(&self, session: Session) {
        let mut inner = self.inner.lock().expect("session cache lock poisoned");
        inner.put(session.token.clone(), session);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session cache lock poisoned").len()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CACHE_CAPACITY)
    }
}
