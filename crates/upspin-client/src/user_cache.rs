//! The user-key cache (§4.7): a bounded, TTL-expiring map in front of the
//! Key service, fronting [`KeyClient::lookup`] the same way
//! `upspin_rpc::SessionCache` fronts the session authenticator.

use std::{
    num::NonZeroUsize,
    sync::Mutex,
    time::{Duration, Instant},
};

use lru::LruCache;
use upspin_error::Error;
use upspin_types::{User, UserName};

use crate::key::KeyClient;

/// Default bound on the number of cached user records (§9.1 Open Question
/// resolution: fixed default, not configurable via the YAML config).
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default TTL for a cached entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct Entry {
    user: User,
    fetched_at: Instant,
}

/// A concurrent, LRU-bounded, TTL-expiring cache mapping [`UserName`] to
/// [`User`], placed in front of a [`KeyClient`] (§4.7).
///
/// Lookups bypass the network when a valid entry exists. `Put` invalidates
/// the local entry for the affected user so a subsequent `lookup` always
/// reflects the write (§8 property 7, "cache coherence").
pub struct UserKeyCache {
    key: KeyClient,
    ttl: Duration,
    inner: Mutex<LruCache<UserName, Entry>>,
}

impl UserKeyCache {
    pub fn new(key: KeyClient, capacity: usize, ttl: Duration) -> Self {
        let capacity =
            NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            key,
            ttl,
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_defaults(key: KeyClient) -> Self {
        Self::new(key, DEFAULT_CAPACITY, DEFAULT_TTL)
    }

    /// Returns the cached record if present and unexpired; otherwise fetches
    /// via the underlying [`KeyClient`] and populates the cache.
    pub async fn lookup(&self, name: &UserName) -> Result<User, Error> {
        if let Some(user) = self.cached(name) {
            return Ok(user);
        }
        tracing::debug!(%name, "user-key cache miss, fetching from Key service");
        let user = self.key.lookup(name).await?;
        let mut inner = self.inner.lock().expect("user-key cache lock poisoned");
        inner.put(
            name.clone(),
            Entry {
                user: user.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(user)
    }

    /// Writes through to the Key service, then invalidates any cached entry
    /// for this user so the next `lookup` refetches.
    pub async fn put(&self, user: &User) -> Result<(), Error> {
        self.key.put(user).await?;
        self.invalidate(&user.name);
        Ok(())
    }

    pub fn invalidate(&self, name: &UserName) {
        let mut inner = self.inner.lock().expect("user-key cache lock poisoned");
        inner.pop(name);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("user-key cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cached(&self, name: &UserName) -> Option<User> {
        let mut inner = self.inner.lock().expect("user-key cache lock poisoned");
        match inner.get(name) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                Some(entry.user.clone())
            }
            Some(_) => {
                inner.pop(name);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use upspin_crypto::{Factotum, LocalFactotum};
    use upspin_rpc::{ClientConfig, ClientIdentity, Security, TransportClient};
    use upspin_types::Endpoint;

    use super::*;

    // Builds a `KeyClient` over a dialed-but-never-called transport; these
    // tests exercise only the cache bookkeeping, never the network path, so
    // a syntactically valid client that's never invoked is sufficient.
    fn unused_key_client() -> KeyClient {
        let factotum = Arc::new(LocalFactotum::generate());
        let identity = ClientIdentity {
            user: UserName::parse("alice@example.com").unwrap(),
            factotum,
        };
        let config = ClientConfig {
            security: Security::NoSecurity,
            ..ClientConfig::new(Endpoint::remote("127.0.0.1:1"), "Key", identity)
        };
        KeyClient::new(TransportClient::dial(config).unwrap())
    }

    fn user(name: &str) -> User {
        User {
            name: UserName::parse(name).unwrap(),
            dirs: vec![],
            stores: vec![],
            public_key: LocalFactotum::generate().public_key(),
        }
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = UserKeyCache::new(unused_key_client(), 4, Duration::from_secs(60));
        let alice = UserName::parse("alice@example.com").unwrap();
        cache
            .inner
            .lock()
            .unwrap()
            .put(
                alice.clone(),
                Entry {
                    user: user("alice@example.com"),
                    fetched_at: Instant::now(),
                },
            );
        assert_eq!(cache.len(), 1);
        cache.invalidate(&alice);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn expired_entry_is_not_returned_from_cache() {
        let cache = UserKeyCache::new(unused_key_client(), 4, Duration::from_millis(0));
        let alice = UserName::parse("alice@example.com").unwrap();
        cache
            .inner
            .lock()
            .unwrap()
            .put(
                alice.clone(),
                Entry {
                    user: user("alice@example.com"),
                    fetched_at: Instant::now() - Duration::from_secs(1),
                },
            );
        assert!(cache.cached(&alice).is_none());
    }

    #[test]
    fn lru_evicts_oldest_beyond_capacity() {
        let cache = UserKeyCache::new(unused_key_client(), 2, Duration::from_secs(60));
        for name in ["a@example.com", "b@example.com", "c@example.com"] {
            let u = user(name);
            cache
                .inner
                .lock()
                .unwrap()
                .put(
                    u.name.clone(),
                    Entry {
                        user: u,
                        fetched_at: Instant::now(),
                    },
                );
        }
        assert_eq!(cache.len(), 2);
        assert!(cache
            .cached(&UserName::parse("a@example.com").unwrap())
            .is_none());
    }
}
