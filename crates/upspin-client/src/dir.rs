//! The Directory facade: `Lookup`, `Put`, `Glob`, `Delete`, `WhichAccess`
//! and `Watch` against the Dir service (§4.6, §6.2, §4.10).

use serde::{Deserialize, Serialize};
use upspin_error::Error;
use upspin_rpc::{TransportClient, WatchSubscription};
use upspin_types::{DirEntry, Endpoint, PathName};

/// `Glob` patterns longer than this many path elements are rejected before
/// any backend call (§9.1 Open Question resolution).
pub const MAX_GLOB_ELEMENTS: usize = 64;

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

/// Thin wrapper turning each Dir method into a transport call plus message
/// encode/decode.
#[derive(Clone)]
pub struct DirClient {
    transport: TransportClient,
}

impl DirClient {
    pub fn new(transport: TransportClient) -> Self {
        Self { transport }
    }

    pub async fn lookup(&self, path: &PathName) -> Result<DirEntry, Error> {
        self.transport
            .invoke(
                "Lookup",
                &LookupArgs {
                    path: path.clone(),
                },
            )
            .await
    }

    pub async fn put(&self, entry: &DirEntry) -> Result<DirEntry, Error> {
        self.transport
            .invoke(
                "Put",
                &PutArgs {
                    entry: entry.clone(),
                },
            )
            .await
    }

    /// Rejects patterns with more than [`MAX_GLOB_ELEMENTS`] path elements
    /// locally, before making any network call (§9.1).
    pub async fn glob(&self, pattern: &str) -> Result<Vec<DirEntry>, Error> {
        let elements = pattern.split('/').count();
        if elements > MAX_GLOB_ELEMENTS {
            return Err(Error::invalid(format!(
                "glob pattern has {elements} elements, exceeding the cap of \
                 {MAX_GLOB_ELEMENTS}"
            )));
        }
        let result: GlobResult = self
            .transport
            .invoke(
                "Glob",
                &GlobArgs {
                    pattern: pattern.to_string(),
                },
            )
            .await?;
        Ok(result.entries)
    }

    pub async fn delete(&self, path: &PathName) -> Result<DirEntry, Error> {
        self.transport
            .invoke(
                "Delete",
                &DeleteArgs {
                    path: path.clone(),
                },
            )
            .await
    }

    pub async fn which_access(&self, path: &PathName) -> Result<DirEntry, Error> {
        self.transport
            .invoke(
                "WhichAccess",
                &WhichAccessArgs {
                    path: path.clone(),
                },
            )
            .await
    }

    pub async fn endpoint(&self) -> Result<Endpoint, Error> {
        self.transport.invoke("Endpoint", &()).await
    }

    pub async fn ping(&self, seq: u32) -> Result<u32, Error> {
        self.transport.ping(seq).await
    }

    /// Subscribes to directory-change events under `path` starting after
    /// `start_order` (§4.10). The returned subscription drives its own
    /// background task; dropping or closing it releases the underlying
    /// stream promptly.
    pub async fn watch(
        &self,
        path: &PathName,
        start_order: i64,
    ) -> Result<WatchSubscription, Error> {
        self.transport
            .watch(
                "Watch",
                &WatchArgs {
                    path: path.clone(),
                    start_order,
                },
            )
            .await
    }

    /// The underlying transport. Exposed only under `test-utils` so
    /// integration tests can assert on connection reuse (§4.5) without
    /// widening this facade's default surface.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn transport(&self) -> &TransportClient {
        &self.transport
    }
}
