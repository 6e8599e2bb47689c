//! The in-memory Dir service backend: a path-keyed entry map plus a
//! broadcast fan-out for `Watch` subscribers (§4.10).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use upspin_error::Error;
use upspin_rpc::auth::Authenticator;
use upspin_rpc::dispatch::{Dialer, Dispatcher, DispatcherBuilder, typed_method, typed_watch_method};
use upspin_rpc::watch;
use upspin_rpc::{PingArgs, WatchEvent, WatchStream};
use upspin_types::{DirEntry, Endpoint, PathName, UserName};

/// `Glob` patterns longer than this many path elements are rejected before
/// any backend call (§9.1 Open Question resolution).
pub const MAX_GLOB_ELEMENTS: usize = 64;

/// Bound on the number of buffered, not-yet-delivered events per watcher
/// before the oldest is dropped and the subscriber is told to reconnect
/// (tokio's `broadcast` semantics; §9.1: reconnect buffering is otherwise
/// unimplemented).
const WATCH_BROADCAST_CAPACITY: usize = 1024;

#[derive(Serialize, Deserialize)]
struct LookupArgs {
    path: PathName,
}

#[derive(Serialize, Deserialize)]
struct PutArgs {
    entry: DirEntry,
}

#[derive(Serialize, Deserialize)]
struct GlobArgs {
    pattern: String,
}

#[derive(Serialize, Deserialize)]
struct GlobResult {
    entries: Vec<DirEntry>,
}

#[derive(Serialize, Deserialize)]
struct DeleteArgs {
    path: PathName,
}

#[derive(Serialize, Deserialize)]
struct WhichAccessArgs {
    path: PathName,
}

#[derive(Serialize, Deserialize)]
struct WatchArgs {
    path: PathName,
    start_order: i64,
}

#[derive(Clone)]
struct Mutation {
    path: PathName,
    event: WatchEvent,
}

pub struct DirBackend {
    entries: Mutex<HashMap<PathName, DirEntry>>,
    order: AtomicI64,
    endpoint: Endpoint,
    mutations: broadcast::Sender<Mutation>,
}

impl DirBackend {
    pub fn new(endpoint: Endpoint) -> Self {
        let (mutations, _) = broadcast::channel(WATCH_BROADCAST_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            order: AtomicI64::new(0),
            endpoint,
            mutations,
        }
    }

    async fn lookup(&self, path: &PathName, session_user: &UserName) -> Result<DirEntry, Error> {
        require_own_namespace(path, session_user)?;
        self.entries
            .lock()
            .expect("dir backend lock poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_exist(format!("{path} does not exist")))
    }

    async fn put(&self, entry: DirEntry, session_user: &UserName) -> Result<DirEntry, Error> {
        require_own_namespace(&entry.name, session_user)?;
        // Order assignment and the entry-map mutation happen under the same
        // lock so a concurrent `Watch`'s snapshot-plus-baseline read (§4.10
        // `start_order == 0`) never observes an order bump without the
        // matching map entry, or vice versa.
        let (order, stored) = {
            let mut entries = self.entries.lock().expect("dir backend lock poisoned");
            let order = self.next_order();
            let mut stored = entry;
            stored.sequence = order as u64;
            stored.time = now_unix();
            entries.insert(stored.name.clone(), stored.clone());
            (order, stored)
        };
        self.broadcast(stored.name.clone(), WatchEvent::upsert(stored.clone(), order));
        Ok(stored)
    }

    async fn delete(&self, path: &PathName, session_user: &UserName) -> Result<DirEntry, Error> {
        require_own_namespace(path, session_user)?;
        let (order, removed) = {
            let mut entries = self.entries.lock().expect("dir backend lock poisoned");
            let removed = entries
                .remove(path)
                .ok_or_else(|| Error::not_exist(format!("{path} does not exist")))?;
            let order = self.next_order();
            (order, removed)
        };
        self.broadcast(path.clone(), WatchEvent::delete(removed.clone(), order));
        Ok(removed)
    }

    /// Climbs from `path`'s containing directory up to the root looking for
    /// a sibling `Access` entry, the nearest one found being the file's
    /// controlling Access file.
    async fn which_access(&self, path: &PathName, session_user: &UserName) -> Result<DirEntry, Error> {
        require_own_namespace(path, session_user)?;
        let entries = self.entries.lock().expect("dir backend lock poisoned");
        let mut candidate_dir = path.parent().unwrap_or_else(|| path.clone());
        loop {
            let access_path = access_candidate(&candidate_dir);
            if let Some(entry) = entries.get(&access_path) {
                return Ok(entry.clone());
            }
            match candidate_dir.parent() {
                Some(parent) => candidate_dir = parent,
                None => break,
            }
        }
        Err(Error::not_exist(format!(
            "no Access file controls {path}"
        )))
    }

    /// Rejects patterns with more than [`MAX_GLOB_ELEMENTS`] elements before
    /// touching the entry map, and applies the §8 scenario (f) privacy rule:
    /// a pattern with fewer than 2 elements targeting another user's
    /// namespace returns `Private` without confirming or denying existence.
    async fn glob(&self, pattern: &str, session_user: &UserName) -> Result<Vec<DirEntry>, Error> {
        let raw_elements: Vec<&str> = pattern.split('/').collect();
        if raw_elements.len() > MAX_GLOB_ELEMENTS {
            return Err(Error::invalid(format!(
                "glob pattern has {} elements, exceeding the cap of {MAX_GLOB_ELEMENTS}",
                raw_elements.len()
            )));
        }
        let pattern_user = UserName::parse(raw_elements[0])?;
        let pattern_elems = &raw_elements[1..];

        if raw_elements.len() < 2 && &pattern_user != session_user {
            return Err(Error::private(format!(
                "glob pattern {pattern:?} targets another user's namespace"
            )));
        }

        let entries = self.entries.lock().expect("dir backend lock poisoned");
        let mut matches: Vec<DirEntry> = entries
            .values()
            .filter(|entry| {
                entry.name.user() == &pattern_user
                    && entry.name.elements().len() == pattern_elems.len()
                    && entry
                        .name
                        .elements()
                        .iter()
                        .zip(pattern_elems.iter())
                        .all(|(elem, glob_elem)| element_matches(glob_elem, elem))
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.name.to_canonical_string().cmp(&b.name.to_canonical_string()));
        Ok(matches)
    }

    async fn watch(
        &self,
        path: &PathName,
        start_order: i64,
        session_user: &UserName,
    ) -> Result<WatchStream, Error> {
        require_own_namespace(path, session_user)?;
        let mut incoming = self.mutations.subscribe();
        let (producer, stream) = watch::channel(32);
        let watched = path.clone();

        // §4.10: `start_order == 0` means "start from current state
        // snapshot" — replay the subtree's existing entries before moving on
        // to live mutations; `-1` ("live from now") and any positive resume
        // point skip the replay and stream only mutations past that order.
        // The snapshot is read under the same lock `put`/`delete` use to
        // assign orders, so `baseline_order` and the snapshotted entries are
        // mutually consistent: every mutation this watch later receives from
        // the broadcast channel has an order strictly greater than anything
        // already reflected in the snapshot.
        let (snapshot, baseline_order) = if start_order == 0 {
            let entries = self.entries.lock().expect("dir backend lock poisoned");
            let mut matching: Vec<DirEntry> = entries
                .values()
                .filter(|entry| is_ancestor_or_equal(&watched, &entry.name))
                .cloned()
                .collect();
            matching.sort_by_key(|entry| entry.sequence);
            let baseline = matching
                .iter()
                .map(|entry| entry.sequence as i64)
                .max()
                .unwrap_or(0);
            (matching, baseline)
        } else {
            (Vec::new(), start_order)
        };

        tokio::spawn(async move {
            if !producer.send(WatchEvent::leading_ok()).await {
                return;
            }
            for entry in snapshot {
                let order = entry.sequence as i64;
                if !producer.send(WatchEvent::upsert(entry, order)).await {
                    return;
                }
            }
            loop {
                match incoming.recv().await {
                    Ok(mutation) if mutation.event.order > baseline_order
                        && is_ancestor_or_equal(&watched, &mutation.path) =>
                    {
                        if !producer.send(mutation.event).await {
                            return;
                        }
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        producer.close_with_overflow().await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(stream)
    }

    fn next_order(&self) -> i64 {
        self.order.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn broadcast(&self, path: PathName, event: WatchEvent) {
        // No receivers (e.g. no active Watch subscribers) is not an error.
        let _ = self.mutations.send(Mutation { path, event });
    }
}

fn require_own_namespace(path: &PathName, session_user: &UserName) -> Result<(), Error> {
    if path.user() == session_user {
        Ok(())
    } else {
        Err(Error::permission(format!(
            "{session_user} may not operate on {path}"
        )))
    }
}

fn access_candidate(dir: &PathName) -> PathName {
    PathName::parse(format!("{dir}/Access")).expect("dir path plus a literal element is valid")
}

fn is_ancestor_or_equal(watched: &PathName, candidate: &PathName) -> bool {
    watched.user() == candidate.user() && candidate.elements().starts_with(watched.elements())
}

/// Matches a single path element against a glob element supporting `*` as a
/// wildcard for any (possibly empty) run of characters.
fn element_matches(glob: &str, value: &str) -> bool {
    let mut parts = glob.split('*').peekable();
    let mut rest = value;

    let Some(first) = parts.next() else {
        return value.is_empty();
    };
    if !rest.starts_with(first) {
        return false;
    }
    rest = &rest[first.len()..];

    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.is_empty()
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_secs()
}

/// Builds the `Dir` service dispatcher (§6.2): `Lookup`, `Put`, `Glob`,
/// `Delete`, `WhichAccess`, `Watch`, `Endpoint`, `Ping`.
pub fn dispatcher(
    authenticator: Arc<Authenticator>,
    backend: Arc<DirBackend>,
) -> Dispatcher<Arc<DirBackend>> {
    let dialer: Arc<dyn Dialer<Arc<DirBackend>>> = Arc::new(move |_user: &UserName| {
        let backend = Arc::clone(&backend);
        async move { Ok::<_, Error>(backend) }
    });

    DispatcherBuilder::new("Dir", authenticator, dialer)
        .method(
            "Lookup",
            typed_method(|backend: Arc<DirBackend>, session, args: LookupArgs| async move {
                backend.lookup(&args.path, &session.user).await
            }),
        )
        .method(
            "Put",
            typed_method(|backend: Arc<DirBackend>, session, args: PutArgs| async move {
                backend.put(args.entry, &session.user).await
            }),
        )
        .method(
            "Glob",
            typed_method(|backend: Arc<DirBackend>, session, args: GlobArgs| async move {
                let entries = backend.glob(&args.pattern, &session.user).await?;
                Ok(GlobResult { entries })
            }),
        )
        .method(
            "Delete",
            typed_method(|backend: Arc<DirBackend>, session, args: DeleteArgs| async move {
                backend.delete(&args.path, &session.user).await
            }),
        )
        .method(
            "WhichAccess",
            typed_method(|backend: Arc<DirBackend>, session, args: WhichAccessArgs| async move {
                backend.which_access(&args.path, &session.user).await
            }),
        )
        .method(
            "Endpoint",
            typed_method(|backend: Arc<DirBackend>, _session, _args: ()| async move {
                Ok::<Endpoint, Error>(backend.endpoint.clone())
            }),
        )
        .method(
            "Ping",
            typed_method(|_backend: Arc<DirBackend>, _session, args: PingArgs| async move {
                Ok(args)
            }),
        )
        .watch_method(
            "Watch",
            typed_watch_method(|backend: Arc<DirBackend>, session, args: WatchArgs| async move {
                backend.watch(&args.path, args.start_order, &session.user).await
            }),
        )
        .build()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn glob_star_matches_any_suffix() {
        assert!(element_matches("*", "anything"));
        assert!(element_matches("*.txt", "notes.txt"));
        assert!(!element_matches("*.txt", "notes.md"));
        assert!(element_matches("file", "file"));
        assert!(!element_matches("file", "other"));
    }

    #[test]
    fn ancestor_check_respects_user_and_prefix() {
        let watched = PathName::parse("alice@example.com/dir").unwrap();
        let child = PathName::parse("alice@example.com/dir/file").unwrap();
        let other_user = PathName::parse("bob@example.com/dir/file").unwrap();
        let sibling = PathName::parse("alice@example.com/other").unwrap();
        assert!(is_ancestor_or_equal(&watched, &watched));
        assert!(is_ancestor_or_equal(&watched, &child));
        assert!(!is_ancestor_or_equal(&watched, &other_user));
        assert!(!is_ancestor_or_equal(&watched, &sibling));
    }
}
