//! The in-memory Key service backend: a user-name-keyed map of [`User`]
//! records (§3 "User record"), doubling as the [`KeyLookup`] the session
//! authenticator (§4.2) consults on every handshake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use upspin_error::Error;
use upspin_rpc::auth::{Authenticator, KeyLookup};
use upspin_rpc::dispatch::{Dialer, Dispatcher, DispatcherBuilder, typed_method};
use upspin_rpc::PingArgs;
use upspin_types::{Endpoint, User, UserName};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct LookupArgs {
    name: UserName,
}

#[derive(Serialize, Deserialize)]
struct PutArgs {
    user: User,
}

pub struct KeyBackend {
    users: Mutex<HashMap<UserName, User>>,
    endpoint: Endpoint,
}

impl KeyBackend {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            endpoint,
        }
    }

    /// Seeds a user record directly, bypassing `Put`. Used at startup so
    /// the handshake in §4.2 step 2 has a key record to verify against.
    pub fn seed(&self, user: User) {
        self.users
            .lock()
            .expect("key backend lock poisoned")
            .insert(user.name.clone(), user);
    }

    async fn lookup(&self, name: &UserName) -> Result<User, Error> {
        self.users
            .lock()
            .expect("key backend lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_exist(format!("no key record for {name}")))
    }

    async fn put(&self, user: User) -> Result<(), Error> {
        self.users
            .lock()
            .expect("key backend lock poisoned")
            .insert(user.name.clone(), user);
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyLookup for KeyBackend {
    async fn lookup(&self, user: &UserName) -> Result<User, Error> {
        KeyBackend::lookup(self, user).await
    }
}

/// Builds the `Key` service dispatcher (§6.2): `Lookup`, `Put`, `Endpoint`,
/// `Ping`.
pub fn dispatcher(
    authenticator: Arc<Authenticator>,
    backend: Arc<KeyBackend>,
) -> Dispatcher<Arc<KeyBackend>> {
    let dialer: Arc<dyn Dialer<Arc<KeyBackend>>> = Arc::new(move |_user: &UserName| {
        let backend = Arc::clone(&backend);
        async move { Ok::<_, Error>(backend) }
    });

    DispatcherBuilder::new("Key", authenticator, dialer)
        .method(
            "Lookup",
            typed_method(|backend: Arc<KeyBackend>, _session, args: LookupArgs| async move {
                backend.lookup(&args.name).await
            }),
        )
        .method(
            "Put",
            typed_method(|backend: Arc<KeyBackend>, _session, args: PutArgs| async move {
                backend.put(args.user).await
            }),
        )
        .method(
            "Endpoint",
            typed_method(|backend: Arc<KeyBackend>, _session, _args: ()| async move {
                Ok::<Endpoint, Error>(backend.endpoint.clone())
            }),
        )
        .method(
            "Ping",
            typed_method(|_backend: Arc<KeyBackend>, _session, args: PingArgs| async move {
                Ok(args)
            }),
        )
        .build()
}
