//! The Bind Registry (§4.5): a process-wide cache of service handles keyed
//! by `(user, endpoint)`, deduplicating concurrent binds to the same
//! destination and invalidating handles whose liveness probe has failed.
//!
//! The source represents this as an implicit package-level global. Per §9's
//! "Global Bind registry" redesign note, this crate instead makes the
//! registry an explicit, constructible value (typically held once behind an
//! `Arc` and shared by whoever builds the process, e.g. `upspin-server`)
//! with ordinary init-at-startup / drop-at-shutdown lifetime — no
//! `static`/`OnceLock` singleton.

use std::{
    collections::HashMap,
    future::Future,
    ops::Deref,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use upspin_error::Error;
use upspin_types::{Endpoint, UserName};

/// How long a failed liveness probe disqualifies a cached handle from reuse
/// before the registry allows a fresh dial (§4.5 "Failure mode").
pub const PROBE_FAILURE_GRACE: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct BindKey {
    user: UserName,
    endpoint: Endpoint,
}

struct Entry<H> {
    handle: Arc<H>,
    refs: usize,
    probe_failed_at: Option<Instant>,
}

struct Inner<H> {
    entries: Mutex<HashMap<BindKey, Entry<H>>>,
    /// Per-key async locks serializing concurrent first-time dials (§4.5,
    /// §5: "the invariant is enforced under a short critical section;
    /// dialing happens outside the section"). A key's lock is created
    /// lazily and left in place afterwards; its footprint is bounded by the
    /// number of distinct `(user, endpoint)` pairs ever bound, which in
    /// practice is small and stable.
    dial_locks: Mutex<HashMap<BindKey, Arc<tokio::sync::Mutex<()>>>>,
}

/// A process-wide cache of service handles of type `H` (e.g. a
/// `TransportClient` wrapper), keyed by `(user, endpoint)`.
///
/// Cheap to clone; clones share the same underlying cache.
pub struct BindRegistry<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for BindRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H> Default for BindRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> BindRegistry<H> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                dial_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// `BindX(user, endpoint)`: returns a cached handle if one exists and
    /// hasn't failed its liveness probe within the grace window; otherwise
    /// dials a fresh one via `dial` and caches it. Duplicate concurrent
    /// calls for the same `(user, endpoint)` converge on the same handle.
    pub async fn bind<F, Fut>(
        &self,
        user: &UserName,
        endpoint: &Endpoint,
        dial: F,
    ) -> Result<BoundService<H>, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, Error>>,
    {
        let key = BindKey {
            user: user.clone(),
            endpoint: endpoint.clone(),
        };

        if let Some(handle) = self.try_reuse(&key) {
            tracing::debug!(%user, %endpoint, "bind: reusing cached handle");
            return Ok(BoundService {
                key,
                handle,
                registry: Arc::clone(&self.inner),
            });
        }

        // Serialize concurrent first-time dials for this key so they
        // converge on one handle instead of each dialing independently
        // (§4.5: "duplicate calls ... MUST return the same underlying
        // handle"). The per-key lock is held only across the dial; map
        // mutation still happens under the short `entries` critical section
        // (§5).
        let dial_lock = self.dial_lock_for(&key);
        let _dial_guard = dial_lock.lock().await;

        // Someone else may have just finished dialing this key while we
        // were waiting for the lock.
        if let Some(handle) = self.try_reuse(&key) {
            tracing::debug!(%user, %endpoint, "bind: reusing handle dialed by a racing caller");
            return Ok(BoundService {
                key,
                handle,
                registry: Arc::clone(&self.inner),
            });
        }

        tracing::debug!(%user, %endpoint, "bind: dialing fresh handle");
        let fresh = Arc::new(dial().await?);

        let mut entries = self.inner.entries.lock().expect("lock poisoned");
        // A fresh dial always supersedes whatever is cached under this key
        // (stale or probe-failed); `try_reuse` above is the only path that
        // returns an existing handle.
        match entries.get_mut(&key) {
            Some(existing) => {
                existing.handle = Arc::clone(&fresh);
                existing.refs += 1;
                existing.probe_failed_at = None;
            }
            None => {
                entries.insert(
                    key.clone(),
                    Entry {
                        handle: Arc::clone(&fresh),
                        refs: 1,
                        probe_failed_at: None,
                    },
                );
            }
        }
        drop(entries);

        Ok(BoundService {
            key,
            handle: fresh,
            registry: Arc::clone(&self.inner),
        })
    }

    fn dial_lock_for(&self, key: &BindKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.inner.dial_locks.lock().expect("lock poisoned");
        Arc::clone(
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn try_reuse(&self, key: &BindKey) -> Option<Arc<H>> {
        let mut entries = self.inner.entries.lock().expect("lock poisoned");
        let stale = match entries.get(key) {
            Some(entry) => entry
                .probe_failed_at
                .is_some_and(|failed_at| failed_at.elapsed() >= PROBE_FAILURE_GRACE),
            None => return None,
        };
        if stale {
            entries.remove(key);
            return None;
        }
        let entry = entries.get_mut(key)?;
        if entry.probe_failed_at.is_some() {
            // Still within the grace window: not yet eligible for reuse or
            // eviction: the next bind attempt must redial, never block.
            return None;
        }
        entry.refs += 1;
        Some(Arc::clone(&entry.handle))
    }

    /// Records the outcome of a liveness probe (§4.5 "Failure mode"). A
    /// failure disqualifies the cached handle from reuse until the grace
    /// window elapses, at which point the next `bind` call dials afresh.
    pub fn record_probe_result(&self, user: &UserName, endpoint: &Endpoint, ok: bool) {
        let key = BindKey {
            user: user.clone(),
            endpoint: endpoint.clone(),
        };
        let mut entries = self.inner.entries.lock().expect("lock poisoned");
        if let Some(entry) = entries.get_mut(&key) {
            entry.probe_failed_at = if ok { None } else { Some(Instant::now()) };
        }
    }

    /// The number of distinct `(user, endpoint)` handles currently cached.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A shared, ref-counted binding returned by [`BindRegistry::bind`].
/// Derefs to the underlying handle. Dropping the last live clone releases
/// the registry's entry, so a later `bind` call for the same key redials.
pub struct BoundService<H> {
    key: BindKey,
    handle: Arc<H>,
    registry: Arc<Inner<H>>,
}

impl<H> Deref for BoundService<H> {
    type Target = H;
    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H> Clone for BoundService<H> {
    fn clone(&self) -> Self {
        let mut entries = self.registry.entries.lock().expect("lock poisoned");
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refs += 1;
        }
        drop(entries);
        Self {
            key: self.key.clone(),
            handle: Arc::clone(&self.handle),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<H> Drop for BoundService<H> {
    fn drop(&mut self) {
        let mut entries = self.registry.entries.lock().expect("lock poisoned");
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                entries.remove(&self.key);
            }
        }
    }
}
