//! The in-memory Store service backend: a reference-keyed blob map. Content
//! hashing and packing are out of scope (§1); references are simply minted
//! in increasing order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use upspin_error::Error;
use upspin_rpc::auth::Authenticator;
use upspin_rpc::dispatch::{Dialer, Dispatcher, DispatcherBuilder, typed_method};
use upspin_rpc::PingArgs;
use upspin_types::{Endpoint, Location, RefData, Reference, UserName};

#[derive(Serialize, Deserialize)]
struct GetArgs {
    reference: Reference,
}

#[derive(Serialize, Deserialize)]
struct GetResult {
    data: Vec<u8>,
    ref_data: RefData,
    locations: Vec<Location>,
}

#[derive(Serialize, Deserialize)]
struct PutArgs {
    data: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct DeleteArgs {
    reference: Reference,
}

pub struct StoreBackend {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
    endpoint: Endpoint,
}

impl StoreBackend {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            endpoint,
        }
    }

    async fn get(&self, reference: &Reference) -> Result<GetResult, Error> {
        let data = self
            .blobs
            .lock()
            .expect("store backend lock poisoned")
            .get(&reference.0)
            .cloned()
            .ok_or_else(|| Error::not_exist(format!("no such reference {}", reference.0)))?;
        let ref_data = RefData {
            reference: reference.clone(),
            size: data.len() as u64,
        };
        let locations = vec![Location {
            endpoint: self.endpoint.clone(),
            reference: reference.clone(),
        }];
        Ok(GetResult {
            data,
            ref_data,
            locations,
        })
    }

    async fn put(&self, data: Vec<u8>) -> Result<RefData, Error> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let reference = Reference::new(format!("b{id}"));
        let size = data.len() as u64;
        self.blobs
            .lock()
            .expect("store backend lock poisoned")
            .insert(reference.0.clone(), data);
        Ok(RefData { reference, size })
    }

    async fn delete(&self, reference: &Reference) -> Result<(), Error> {
        self.blobs
            .lock()
            .expect("store backend lock poisoned")
            .remove(&reference.0)
            .map(|_| ())
            .ok_or_else(|| Error::not_exist(format!("no such reference {}", reference.0)))
    }
}

/// Builds the `Store` service dispatcher (§6.2): `Get`, `Put`, `Delete`,
/// `Endpoint`, `Ping`.
pub fn dispatcher(
    authenticator: Arc<Authenticator>,
    backend: Arc<StoreBackend>,
) -> Dispatcher<Arc<StoreBackend>> {
    let dialer: Arc<dyn Dialer<Arc<StoreBackend>>> = Arc::new(move |_user: &UserName| {
        let backend = Arc::clone(&backend);
        async move { Ok::<_, Error>(backend) }
    });

    DispatcherBuilder::new("Store", authenticator, dialer)
        .method(
            "Get",
            typed_method(|backend: Arc<StoreBackend>, _session, args: GetArgs| async move {
                backend.get(&args.reference).await
            }),
        )
        .method(
            "Put",
            typed_method(|backend: Arc<StoreBackend>, _session, args: PutArgs| async move {
                backend.put(args.data).await
            }),
        )
        .method(
            "Delete",
            typed_method(|backend: Arc<StoreBackend>, _session, args: DeleteArgs| async move {
                backend.delete(&args.reference).await
            }),
        )
        .method(
            "Endpoint",
            typed_method(|backend: Arc<StoreBackend>, _session, _args: ()| async move {
                Ok::<Endpoint, Error>(backend.endpoint.clone())
            }),
        )
        .method(
            "Ping",
            typed_method(|_backend: Arc<StoreBackend>, _session, args: PingArgs| async move {
                Ok(args)
            }),
        )
        .build()
}
