//! Ties the user-key cache (§4.7) to the Bind Registry (§4.5): resolves a
//! user name to its Directory/Storage endpoints, then binds a cached
//! [`TransportClient`] for that `(user, endpoint)` pair, handing back a
//! ready-to-use facade. Callers never dial directly; repeated binds to the
//! same destination converge on the same underlying connection.

use std::collections::HashMap;
use std::sync::Mutex;

use upspin_bind::{BindRegistry, BoundService};
use upspin_error::Error;
use upspin_rpc::{ClientConfig, ClientIdentity, Security, TransportClient};
use upspin_types::{Endpoint, UserName};

use crate::{DirClient, KeyClient, StoreClient, UserKeyCache};

/// Resolves users to endpoints (via the user-key cache) and endpoints to
/// live connections (via the bind registry), so a caller only ever names a
/// [`UserName`] to get back a facade.
pub struct ServiceBinder {
    identity: ClientIdentity,
    security: Security,
    registry: BindRegistry<TransportClient>,
    keys: UserKeyCache,
    /// Keeps a [`BoundService`] alive per `(user, endpoint)` for as long as
    /// this binder lives, so the registry's ref count never drops to zero
    /// between calls and a later `bind_dir`/`bind_store` reuses the same
    /// connection instead of redialing (§4.5 "Duplicate calls ... MUST
    /// return the same underlying handle").
    held: Mutex<HashMap<(UserName, Endpoint), BoundService<TransportClient>>>,
}

impl ServiceBinder {
    /// `identity` signs every handshake this binder performs; `key_endpoint`
    /// is where it resolves user key records from.
    pub fn new(identity: ClientIdentity, key_endpoint: Endpoint, security: Security) -> Result<Self, Error> {
        let key_transport = dial(key_endpoint, "Key", identity.clone(), security)?;
        let keys = UserKeyCache::with_defaults(KeyClient::new(key_transport));
        Ok(Self {
            identity,
            security,
            registry: BindRegistry::new(),
            keys,
            held: Mutex::new(HashMap::new()),
        })
    }

    /// `BindDir` (§4.5): resolves `user`'s directory endpoint via the
    /// user-key cache, then binds (dialing only on a cache miss).
    pub async fn bind_dir(&self, user: &UserName) -> Result<DirClient, Error> {
        let record = self.keys.lookup(user).await?;
        let endpoint = record
            .dirs
            .first()
            .ok_or_else(|| Error::not_exist(format!("{user} publishes no directory endpoint")))?
            .clone();
        let transport = self.bind_transport(user, &endpoint, "Dir").await?;
        Ok(DirClient::new(transport))
    }

    /// `BindStore`: as [`Self::bind_dir`], against `user`'s store endpoint.
    pub async fn bind_store(&self, user: &UserName) -> Result<StoreClient, Error> {
        let record = self.keys.lookup(user).await?;
        let endpoint = record
            .stores
            .first()
            .ok_or_else(|| Error::not_exist(format!("{user} publishes no store endpoint")))?
            .clone();
        let transport = self.bind_transport(user, &endpoint, "Store").await?;
        Ok(StoreClient::new(transport))
    }

    /// Reports a liveness-probe outcome against `(user, endpoint)`, forcing
    /// a redial on the next bind if it failed (§4.5 "Failure mode").
    pub fn record_probe_result(&self, user: &UserName, endpoint: &Endpoint, ok: bool) {
        self.registry.record_probe_result(user, endpoint, ok);
    }

    pub fn user_keys(&self) -> &UserKeyCache {
        &self.keys
    }

    async fn bind_transport(
        &self,
        user: &UserName,
        endpoint: &Endpoint,
        service: &'static str,
    ) -> Result<TransportClient, Error> {
        let key = (user.clone(), endpoint.clone());
        if let Some(bound) = self.held.lock().expect("lock poisoned").get(&key) {
            return Ok((**bound).clone());
        }

        let identity = self.identity.clone();
        let security = self.security;
        let endpoint_owned = endpoint.clone();
        let bound = self
            .registry
            .bind(user, endpoint, move || async move {
                dial(endpoint_owned, service, identity, security)
            })
            .await?;
        let transport = (*bound).clone();
        self.held.lock().expect("lock poisoned").insert(key, bound);
        Ok(transport)
    }
}

fn dial(
    endpoint: Endpoint,
    service: &'static str,
    identity: ClientIdentity,
    security: Security,
) -> Result<TransportClient, Error> {
    let mut config = ClientConfig::new(endpoint, service, identity);
    config.security = security;
    TransportClient::dial(config)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use upspin_crypto::LocalFactotum;

    use super::*;

    fn identity(name: &str) -> ClientIdentity {
        ClientIdentity {
            user: UserName::parse(name).unwrap(),
            factotum: Arc::new(LocalFactotum::generate()),
        }
    }

    #[tokio::test]
    async fn binding_an_unresolvable_user_surfaces_not_exist() {
        // Key service itself is unreachable at this loopback address, but
        // binder construction only dials lazily (no handshake yet), so
        // `new` succeeds and the first resolution attempt is what fails.
        let binder = ServiceBinder::new(
            identity("alice@example.com"),
            Endpoint::remote("127.0.0.1:1"),
            Security::NoSecurity,
        )
        .unwrap();

        let err = binder
            .bind_dir(&UserName::parse("bob@example.com").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind, upspin_error::Kind::Io);
    }
}
