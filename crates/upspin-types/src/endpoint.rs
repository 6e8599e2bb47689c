//! `Endpoint`: `(Transport, NetAddr)`, textual form `transport,address`.

use std::fmt;

use serde::{Deserialize, Serialize};
use upspin_error::Error;

/// The transport kind of an [`Endpoint`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(strum::VariantArray))]
pub enum Transport {
    /// Sentinel meaning "not configured"; may never be dialed.
    Unassigned,
    /// In the same process; no network hop.
    InProcess,
    /// A real network address, reached over HTTP/2 (+ TLS unless loopback).
    Remote,
    /// A co-resident service reached over a Unix socket (or, lacking one, a
    /// deterministic loopback TCP port).
    Local,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Unassigned => "unassigned",
            Transport::InProcess => "inprocess",
            Transport::Remote => "remote",
            Transport::Local => "local",
        }
    }

    fn parse(s: &str) -> Result<Self, Error> {
        match s {
            "unassigned" => Ok(Transport::Unassigned),
            "inprocess" => Ok(Transport::InProcess),
            "remote" => Ok(Transport::Remote),
            "local" => Ok(Transport::Local),
            other =>
                Err(Error::invalid(format!("unknown transport {other:?}"))),
        }
    }
}

/// The network address half of an [`Endpoint`]. Opaque beyond its textual
/// form; interpretation (DNS host, host:port, socket id) is transport-
/// dependent and left to the dialer.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NetAddr(String);

impl NetAddr {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(Transport, NetAddr)`, identifying a running service.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    pub transport: Transport,
    pub addr: NetAddr,
}

impl Endpoint {
    pub const UNASSIGNED: Endpoint = Endpoint {
        transport: Transport::Unassigned,
        addr: NetAddr(String::new()),
    };

    pub fn remote(addr: impl Into<String>) -> Self {
        Self {
            transport: Transport::Remote,
            addr: NetAddr(addr.into()),
        }
    }

    pub fn local(socket_id: impl Into<String>) -> Self {
        Self {
            transport: Transport::Local,
            addr: NetAddr(socket_id.into()),
        }
    }

    pub fn in_process() -> Self {
        Self {
            transport: Transport::InProcess,
            addr: NetAddr(String::new()),
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.transport == Transport::Unassigned
    }

    /// Parses `transport,address`. `inprocess` and `unassigned` ignore any
    /// trailing address.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, Error> {
        let s = s.as_ref();
        let mut parts = s.splitn(2, ',');
        let transport_str = parts.next().unwrap_or("");
        let transport = Transport::parse(transport_str)?;
        let addr_str = parts.next().unwrap_or("");
        match transport {
            Transport::Remote if addr_str.is_empty() =>
                Err(Error::invalid("remote endpoint requires an address")),
            Transport::Local if addr_str.is_empty() =>
                Err(Error::invalid("local endpoint requires a socket id")),
            _ => Ok(Endpoint {
                transport,
                addr: NetAddr(addr_str.to_string()),
            }),
        }
    }

    pub fn to_canonical_string(&self) -> String {
        format!("{},{}", self.transport.as_str(), self.addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl TryFrom<String> for Endpoint {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Error> {
        Self::parse(&s)
    }
}

impl From<Endpoint> for String {
    fn from(e: Endpoint) -> String {
        e.to_canonical_string()
    }
}

impl std::str::FromStr for Endpoint {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        Self::parse(s)
    }
}

#[cfg(feature = "test-utils")]
impl proptest::arbitrary::Arbitrary for Endpoint {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        prop_oneof![
            "[a-z0-9.]{3,20}:[0-9]{2,5}".prop_map(Endpoint::remote),
            "[a-z0-9-]{3,20}".prop_map(Endpoint::local),
            Just(Endpoint::in_process()),
        ]
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use strum::VariantArray;

    use super::*;

    #[test]
    fn every_transport_round_trips_through_its_string_form() {
        for transport in Transport::VARIANTS {
            assert_eq!(Transport::parse(transport.as_str()).unwrap(), *transport);
        }
    }

    #[test]
    fn parses_remote() {
        let e = Endpoint::parse("remote,example.com:443").unwrap();
        assert_eq!(e.transport, Transport::Remote);
        assert_eq!(e.addr.as_str(), "example.com:443");
    }

    #[test]
    fn unassigned_is_never_dialable_marker() {
        assert!(Endpoint::UNASSIGNED.is_unassigned());
    }

    #[test]
    fn remote_requires_address() {
        assert!(Endpoint::parse("remote,").is_err());
    }

    #[test]
    fn roundtrip_for_non_unassigned() {
        let e = Endpoint::remote("203.0.113.1:1234");
        let s = e.to_canonical_string();
        let e2 = Endpoint::parse(&s).unwrap();
        assert_eq!(e, e2);
    }

    #[test]
    fn rejects_unknown_transport() {
        assert!(Endpoint::parse("quic,host:1").is_err());
    }
}
