//! Shared harness for the end-to-end scenario tests: a real `upspin-server`
//! router bound to a loopback `TcpListener`, driven by the real
//! `upspin-rpc` transport client — no mocked transport, matching the
//! integration-test convention already used by `upspin-rpc`'s own `dispatch`
//! and `transport` modules (§8.1).

use std::net::SocketAddr;
use std::sync::Arc;

use upspin_config::Config;
use upspin_crypto::{Factotum, LocalFactotum};
use upspin_rpc::auth::Authenticator;
use upspin_rpc::{ClientConfig, ClientIdentity, Security, TransportClient};
use upspin_server::backend::{DirBackend, KeyBackend, StoreBackend};
use upspin_types::{Endpoint, User, UserName};

pub struct TestServer {
    pub addr: SocketAddr,
    pub endpoint: Endpoint,
    pub key_backend: Arc<KeyBackend>,
    pub store_backend: Arc<StoreBackend>,
    pub dir_backend: Arc<DirBackend>,
    pub authenticator: Arc<Authenticator>,
}

impl TestServer {
    /// Registers `user`'s public key with this server's Key backend, as
    /// startup seeding would (§4.2 step 2 needs a record to verify the
    /// first handshake against).
    pub fn seed(&self, user: &UserName, factotum: &LocalFactotum) {
        self.key_backend.seed(User {
            name: user.clone(),
            dirs: vec![self.endpoint.clone()],
            stores: vec![self.endpoint.clone()],
            public_key: factotum.public_key(),
        });
    }
}

/// Spins up a full `upspin-server` (Key + Store + Dir dispatchers, no
/// config file) on an OS-assigned loopback port.
pub async fn spawn() -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind loopback listener");
    let addr = listener.local_addr().expect("bound listener has a local addr");
    let endpoint = Endpoint::remote(addr.to_string());

    let state = upspin_server::run::build(None, endpoint.clone());
    let key_backend = Arc::clone(&state.key_backend);
    let store_backend = Arc::clone(&state.store_backend);
    let dir_backend = Arc::clone(&state.dir_backend);
    let authenticator = Arc::clone(&state.authenticator);
    let router = upspin_server::run::router(state);

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("test server exited unexpectedly");
    });

    TestServer {
        addr,
        endpoint,
        key_backend,
        store_backend,
        dir_backend,
        authenticator,
    }
}

/// Like [`spawn`], but the server authenticates itself as `server_user`
/// during any proxy handshake (§4.2 step 2, §4.3 "Proxy mode"), signing
/// with `server_factotum`. Used to drive §8 scenario (e).
pub async fn spawn_with_identity(
    server_user: &UserName,
    server_factotum: Arc<LocalFactotum>,
) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind loopback listener");
    let addr = listener.local_addr().expect("bound listener has a local addr");
    let endpoint = Endpoint::remote(addr.to_string());

    let config = Config::default()
        .with_username(server_user.clone())
        .with_factotum(server_factotum as Arc<dyn Factotum>);

    let state = upspin_server::run::build(Some(&config), endpoint.clone());
    let key_backend = Arc::clone(&state.key_backend);
    let store_backend = Arc::clone(&state.store_backend);
    let dir_backend = Arc::clone(&state.dir_backend);
    let authenticator = Arc::clone(&state.authenticator);
    let router = upspin_server::run::router(state);

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("test server exited unexpectedly");
    });

    TestServer {
        addr,
        endpoint,
        key_backend,
        store_backend,
        dir_backend,
        authenticator,
    }
}

/// A fresh identity for `name`, along with the factotum behind it so the
/// caller can register its public key with a server's Key backend.
pub fn new_identity(name: &str) -> (ClientIdentity, Arc<LocalFactotum>) {
    let user = UserName::parse(name).expect("valid test user name");
    let factotum = Arc::new(LocalFactotum::generate());
    let identity = ClientIdentity {
        user,
        factotum: Arc::clone(&factotum) as Arc<dyn Factotum>,
    };
    (identity, factotum)
}

/// Dials `endpoint` over plain HTTP, as is required for a loopback
/// destination with no TLS listener (§4.3, §8 scenario (d)).
pub fn dial(endpoint: &Endpoint, service: &'static str, identity: ClientIdentity) -> TransportClient {
    let mut config = ClientConfig::new(endpoint.clone(), service, identity);
    config.security = Security::NoSecurity;
    TransportClient::dial(config).expect("dial against a loopback server should succeed")
}
