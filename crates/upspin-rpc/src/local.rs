//! The local-loopback transport (§4.9): a convenience scheme for wiring
//! co-resident services together without a real DNS name.
//!
//! A [`Transport::Local`](upspin_types::Transport::Local) endpoint's address
//! is an opaque socket identifier, not a host:port. On POSIX platforms the
//! natural implementation is a Unix domain socket named after that
//! identifier; [`Dispatcher`](crate::dispatch::Dispatcher) supports that
//! directly via [`serve_unix`](crate::dispatch::serve_unix). `reqwest`,
//! which backs the client side of this crate (§4.3.1), has no pluggable
//! transport for Unix sockets, so the client instead always dials the
//! deterministic loopback TCP port derived from the same identifier — the
//! same fallback the spec names for platforms lacking Unix sockets. A
//! server wanting to be reachable from this crate's client should bind both
//! `local_addr_for` and (optionally, for other same-host clients) the Unix
//! socket at the conventional path.

use std::{
    hash::{Hash, Hasher},
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

/// The low end of the port range we hash local-transport socket ids into.
/// Chosen to sit comfortably above the well-known/registered port ranges.
const PORT_RANGE_START: u16 = 49_152;
const PORT_RANGE_LEN: u16 = u16::MAX - PORT_RANGE_START;

/// Derives a deterministic loopback `SocketAddr` from a [`Transport::Local`]
/// socket identifier (§4.9). Same identifier always yields the same port
/// within a process and across processes on the same machine.
pub fn local_addr_for(socket_id: &str) -> SocketAddr {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    socket_id.hash(&mut hasher);
    let port = PORT_RANGE_START + (hasher.finish() % u64::from(PORT_RANGE_LEN)) as u16;
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// The conventional Unix domain socket path for a local-transport socket id,
/// used by [`serve_unix`](crate::dispatch::serve_unix) callers.
#[cfg(unix)]
pub fn unix_socket_path(socket_id: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("upspin-{socket_id}.sock"))
}

/// Whether `host` (a bare host, a bare IPv6 literal, `host:port`, or
/// `[v6]:port`) names a loopback address (§4.3: "TLS is required unless the
/// endpoint is a loopback address").
pub fn is_loopback_host(host: &str) -> bool {
    // Try the whole string as a bare IP literal first: a bare IPv6 address
    // like "::1" contains colons that aren't a port separator, so splitting
    // on the last `:` before checking would mangle it.
    if let Ok(addr) = host.parse::<IpAddr>() {
        return addr.is_loopback();
    }

    // Bracketed IPv6, optionally with a trailing `:port`: "[::1]" / "[::1]:443".
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((ip_part, _)) => ip_part.parse::<IpAddr>().is_ok_and(|a| a.is_loopback()),
            None => false,
        };
    }

    // Otherwise this is a bare hostname or an IPv4/hostname `host:port` pair;
    // the trailing `:port` is safe to strip since there are no other colons.
    let host_only = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    if host_only == "localhost" {
        return true;
    }
    match host_only.parse::<IpAddr>() {
        Ok(addr) => addr.is_loopback(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn same_id_hashes_to_same_port() {
        assert_eq!(local_addr_for("keyserver"), local_addr_for("keyserver"));
    }

    #[test]
    fn different_ids_usually_hash_differently() {
        assert_ne!(local_addr_for("keyserver"), local_addr_for("dirserver"));
    }

    #[test]
    fn recognizes_loopback_hosts() {
        assert!(is_loopback_host("127.0.0.1:1234"));
        assert!(is_loopback_host("localhost:1234"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("[::1]:1234"));
        assert!(!is_loopback_host("203.0.113.1:1234"));
        assert!(!is_loopback_host("example.com:443"));
        assert!(!is_loopback_host("[2001:db8::1]:443"));
    }
}
