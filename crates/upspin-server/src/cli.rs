//! Command-line entry point for the `upspin-server` binary (§2.1).

use std::net::SocketAddr;
use std::path::PathBuf;

/// An in-memory Upspin Key/Store/Dir server, serving the authenticated
/// remote-service protocol over HTTP/2.
#[derive(argh::FromArgs)]
pub struct Args {
    /// path to the YAML config file (§6.4). If omitted, the server runs
    /// with an unnamed identity and no factotum of its own; it still signs
    /// nothing, since the server's own identity is only needed for proxy
    /// mutual auth.
    #[argh(option)]
    pub config: Option<PathBuf>,

    /// the <ip-address:port> to listen on.
    ///
    /// Default: `127.0.0.1:8443`.
    #[argh(option, default = "default_listen_addr()")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8443".parse().expect("valid socket address")
}
