//! The TLS trust anchor pool named in the config file's `tlscerts` key
//! (§6.4), consumed by `upspin-rpc`'s transport client (§4.3: "The TLS trust
//! anchor set is taken from the Context (may augment or replace the OS
//! roots)").

use std::{fs, path::Path, sync::Arc};

use rustls::RootCertStore;
use upspin_error::Error;

/// A set of trust anchors: Mozilla's webpki roots plus any PEM files found
/// in the configured `tlscerts` directory.
pub struct TlsPool {
    roots: RootCertStore,
}

impl TlsPool {
    /// Builds a pool from Mozilla's webpki roots alone.
    pub fn os_roots() -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self { roots }
    }

    /// Builds a pool from webpki roots augmented with every `*.pem` file in
    /// `dir`.
    pub fn from_pem_dir(dir: &Path) -> Result<Self, Error> {
        let mut pool = Self::os_roots();
        let entries = fs::read_dir(dir).map_err(Error::from)?;
        for entry in entries {
            let entry = entry.map_err(Error::from)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pem") {
                continue;
            }
            let pem_bytes = fs::read(&path).map_err(Error::from)?;
            let mut reader = std::io::Cursor::new(pem_bytes);
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    Error::invalid(format!(
                        "invalid PEM cert in {}: {e}",
                        path.display()
                    ))
                })?;
                pool.roots.add(cert).map_err(|e| {
                    Error::invalid(format!("bad trust anchor: {e}"))
                })?;
            }
        }
        Ok(pool)
    }

    pub fn as_root_cert_store(&self) -> &RootCertStore {
        &self.roots
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}
