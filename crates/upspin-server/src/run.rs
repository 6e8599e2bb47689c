//! Builds the three backends and their dispatchers into a runnable server
//! (§2.1, §6.2).

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use upspin_config::Config;
use upspin_crypto::Factotum;
use upspin_rpc::auth::Authenticator;
use upspin_rpc::session::SessionCache;
use upspin_types::{Endpoint, User};

use crate::{backend, cli, health};

/// The backends and authenticator behind a running server, exposed so tests
/// can seed records or construct a [`Router`] without parsing CLI args.
pub struct ServerState {
    pub key_backend: Arc<backend::KeyBackend>,
    pub store_backend: Arc<backend::StoreBackend>,
    pub dir_backend: Arc<backend::DirBackend>,
    pub authenticator: Arc<Authenticator>,
}

/// Wires up the backend triple and the session authenticator for `endpoint`,
/// seeding the key backend with `config`'s own identity if present (§4.2
/// step 2 needs a key record for the first handshake to verify against).
pub fn build(config: Option<&Config>, endpoint: Endpoint) -> ServerState {
    let key_backend = Arc::new(backend::KeyBackend::new(endpoint.clone()));
    let store_backend = Arc::new(backend::StoreBackend::new(endpoint.clone()));
    let dir_backend = Arc::new(backend::DirBackend::new(endpoint.clone()));

    if let (Some(username), Some(factotum)) =
        (config.and_then(Config::username), config.and_then(Config::factotum))
    {
        key_backend.seed(User {
            name: username.clone(),
            dirs: vec![endpoint.clone()],
            stores: vec![endpoint.clone()],
            public_key: factotum.public_key(),
        });
    }

    let cache = Arc::new(SessionCache::default());
    let mut authenticator = Authenticator::new(cache, Arc::clone(&key_backend));
    if let Some(config) = config {
        if let (Some(username), Some(factotum)) = (config.username(), config.factotum()) {
            authenticator = authenticator.with_server_identity(username.clone(), Arc::clone(factotum));
        }
    }

    ServerState {
        key_backend,
        store_backend,
        dir_backend,
        authenticator: Arc::new(authenticator),
    }
}

/// Merges the `Key`, `Store`, `Dir` dispatchers and the liveness endpoint
/// into a single router (§6.1).
pub fn router(state: ServerState) -> Router {
    Router::new()
        .merge(
            backend::key::dispatcher(Arc::clone(&state.authenticator), state.key_backend)
                .into_router(),
        )
        .merge(
            backend::store::dispatcher(Arc::clone(&state.authenticator), state.store_backend)
                .into_router(),
        )
        .merge(backend::dir::dispatcher(state.authenticator, state.dir_backend).into_router())
        .merge(health::router())
}

pub async fn run(args: cli::Args) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Some(Config::from_file(path).context("failed to load config file")?),
        None => None,
    };

    let endpoint = Endpoint::remote(args.listen_addr.to_string());
    let state = build(config.as_ref(), endpoint);
    let router = router(state);

    let listener = tokio::net::TcpListener::bind(args.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", args.listen_addr))?;
    tracing::info!(addr = %args.listen_addr, "upspin-server listening");

    axum::serve(listener, router)
        .await
        .context("server loop exited")
}
