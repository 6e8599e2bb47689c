//! The layered, immutable `Context`/`Config` object (§3, §6.4).
//!
//! [`Config`] is built once from a YAML file plus environment overrides and
//! is then shared by reference; every "set X" operation documented in §9
//! ("Context interface with many setters") is represented here as a
//! `with_*` method returning a *new* `Config`, never an in-place mutation.

use std::{collections::BTreeMap, env, fs, path::Path, sync::Arc};

use serde::Deserialize;
use upspin_crypto::{Factotum, LocalFactotum};
use upspin_error::Error;
use upspin_types::{Endpoint, UserName};

mod tls_pool;
pub use tls_pool::TlsPool;

/// The raw, on-disk YAML shape (§6.4). Unknown top-level keys are hard
/// errors, per spec.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    username: Option<String>,
    keyserver: Option<String>,
    storeserver: Option<String>,
    dirserver: Option<String>,
    cache: Option<String>,
    packing: Option<String>,
    secrets: Option<String>,
    tlscerts: Option<String>,
    #[serde(default)]
    cmdflags: BTreeMap<String, BTreeMap<String, String>>,
}

/// An immutable, layered runtime context (§3 "Context/Configuration").
///
/// Every mutation produces a new value via a `with_*` method; the original
/// is unchanged and may still be shared by other holders.
#[derive(Clone)]
pub struct Config {
    username: Option<UserName>,
    factotum: Option<Arc<dyn Factotum>>,
    packing: Option<String>,
    key_endpoint: Endpoint,
    store_endpoint: Endpoint,
    dir_endpoint: Endpoint,
    cache_endpoint: Endpoint,
    tls_pool: Option<Arc<TlsPool>>,
    cmdflags: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            factotum: None,
            packing: None,
            key_endpoint: Endpoint::UNASSIGNED,
            store_endpoint: Endpoint::UNASSIGNED,
            dir_endpoint: Endpoint::UNASSIGNED,
            cache_endpoint: Endpoint::UNASSIGNED,
            tls_pool: None,
            cmdflags: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Parses `path` as YAML, applies `UPSPIN<KEY>` environment overrides,
    /// and loads the factotum from the `secrets` path (unless it is the
    /// literal `none`).
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(Error::from)?;
        Self::from_yaml_str(&contents)
    }

    /// As [`Config::from_file`], but takes the YAML text directly (and
    /// skips loading key material from disk for `secrets` paths — callers
    /// needing that should use [`Config::from_file`]).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        let mut raw: RawConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::invalid(format!("invalid config: {e}")))?;
        apply_env_overrides(&mut raw);

        let username = raw
            .username
            .as_deref()
            .map(UserName::parse)
            .transpose()?;

        let factotum = match raw.secrets.as_deref() {
            None | Some("none") => None,
            Some(path) => {
                let bytes = fs::read(path).map_err(Error::from)?;
                let f = LocalFactotum::from_secret_bytes(&bytes)
                    .map_err(|e| Error::invalid(e.to_string()))?;
                Some(Arc::new(f) as Arc<dyn Factotum>)
            }
        };

        let parse_endpoint = |s: &Option<String>| -> Result<Endpoint, Error> {
            match s {
                None => Ok(Endpoint::UNASSIGNED),
                Some(s) => Endpoint::parse(s),
            }
        };

        let tls_pool = match raw.tlscerts.as_deref() {
            None => None,
            Some(dir) => Some(Arc::new(TlsPool::from_pem_dir(Path::new(dir))?)),
        };

        Ok(Self {
            username,
            factotum,
            packing: raw.packing,
            key_endpoint: parse_endpoint(&raw.keyserver)?,
            store_endpoint: parse_endpoint(&raw.storeserver)?,
            dir_endpoint: parse_endpoint(&raw.dirserver)?,
            cache_endpoint: parse_endpoint(&raw.cache)?,
            tls_pool,
            cmdflags: raw.cmdflags,
        })
    }

    pub fn username(&self) -> Option<&UserName> {
        self.username.as_ref()
    }

    pub fn factotum(&self) -> Option<&Arc<dyn Factotum>> {
        self.factotum.as_ref()
    }

    pub fn packing(&self) -> Option<&str> {
        self.packing.as_deref()
    }

    pub fn key_endpoint(&self) -> &Endpoint {
        &self.key_endpoint
    }

    pub fn store_endpoint(&self) -> &Endpoint {
        &self.store_endpoint
    }

    pub fn dir_endpoint(&self) -> &Endpoint {
        &self.dir_endpoint
    }

    pub fn cache_endpoint(&self) -> &Endpoint {
        &self.cache_endpoint
    }

    pub fn tls_pool(&self) -> Option<&Arc<TlsPool>> {
        self.tls_pool.as_ref()
    }

    pub fn cmdflag(&self, command: &str, flag: &str) -> Option<&str> {
        self.cmdflags.get(command)?.get(flag).map(String::as_str)
    }

    /// Returns a new `Config` with a different user name. Per §3, changing
    /// an endpoint or identity always produces a new `Config`; it never
    /// mutates `self`.
    pub fn with_username(&self, username: UserName) -> Self {
        let mut next = self.clone();
        next.username = Some(username);
        next
    }

    pub fn with_factotum(&self, factotum: Arc<dyn Factotum>) -> Self {
        let mut next = self.clone();
        next.factotum = Some(factotum);
        next
    }

    pub fn with_dir_endpoint(&self, endpoint: Endpoint) -> Self {
        let mut next = self.clone();
        next.dir_endpoint = endpoint;
        next
    }

    pub fn with_store_endpoint(&self, endpoint: Endpoint) -> Self {
        let mut next = self.clone();
        next.store_endpoint = endpoint;
        next
    }

    pub fn with_key_endpoint(&self, endpoint: Endpoint) -> Self {
        let mut next = self.clone();
        next.key_endpoint = endpoint;
        next
    }
}

/// `Configure` at runtime is deprecated to a no-op per §9.1; this core
/// exposes no `configure()` method at all on [`Config`] — there would be no
/// caller for one.
fn apply_env_overrides(raw: &mut RawConfig) {
    // The spec's literal form is `upspin<key>` (e.g. `upspinusername`); we
    // also accept the conventional all-caps form for practical shell use.
    let lookup = |key: &str| -> Option<String> {
        env::var(format!("upspin{key}"))
            .or_else(|_| env::var(format!("UPSPIN{}", key.to_uppercase())))
            .ok()
    };
    if let Some(v) = lookup("username") {
        raw.username = Some(v);
    }
    if let Some(v) = lookup("keyserver") {
        raw.keyserver = Some(v);
    }
    if let Some(v) = lookup("storeserver") {
        raw.storeserver = Some(v);
    }
    if let Some(v) = lookup("dirserver") {
        raw.dirserver = Some(v);
    }
    if let Some(v) = lookup("cache") {
        raw.cache = Some(v);
    }
    if let Some(v) = lookup("packing") {
        raw.packing = Some(v);
    }
    if let Some(v) = lookup("secrets") {
        raw.secrets = Some(v);
    }
    if let Some(v) = lookup("tlscerts") {
        raw.tlscerts = Some(v);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const YAML: &str = r#"
username: alice@example.com
keyserver: remote,key.example.com:443
storeserver: remote,store.example.com:443
dirserver: remote,dir.example.com:443
packing: plain
secrets: none
"#;

    #[test]
    fn parses_recognized_keys() {
        let cfg = Config::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.username().unwrap().as_str(), "alice@example.com");
        assert_eq!(cfg.packing(), Some("plain"));
        assert!(cfg.factotum().is_none());
    }

    #[test]
    fn rejects_unknown_top_level_key() {
        let bad = format!("{YAML}\nbogus: true\n");
        assert!(Config::from_yaml_str(&bad).is_err());
    }

    #[test]
    fn with_methods_do_not_mutate_original() {
        let cfg = Config::from_yaml_str(YAML).unwrap();
        let other_user = UserName::parse("bob@example.com").unwrap();
        let cfg2 = cfg.with_username(other_user.clone());
        assert_eq!(cfg.username().unwrap().as_str(), "alice@example.com");
        assert_eq!(cfg2.username().unwrap(), &other_user);
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test runs single-threaded w.r.t. this env var.
        unsafe { env::set_var("upspinusername", "carol@example.com") };
        let cfg = Config::from_yaml_str(YAML).unwrap();
        unsafe { env::remove_var("upspinusername") };
        assert_eq!(cfg.username().unwrap().as_str(), "carol@example.com");
    }
}
