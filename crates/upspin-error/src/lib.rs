//! The error taxonomy shared by every `upspin-*` crate.
//!
//! Every crate boundary in this workspace returns `Result<T, Error>`.
//! [`Error`] carries a [`Kind`] discriminant so that callers on both sides of
//! the wire can dispatch on the *kind* of failure (§7 of the core spec)
//! without parsing the human-readable message.

use std::{fmt, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The error taxonomy kinds. Mirrors the Go source's `errors.Kind` values.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
#[cfg_attr(test, derive(strum::VariantArray))]
#[repr(u8)]
pub enum Kind {
    /// Invariant violation in the server; should never happen.
    #[default]
    Internal = 0,
    /// Malformed input.
    Invalid = 1,
    /// Authentication or authorization failure.
    Permission = 2,
    /// Lookup miss.
    NotExist = 3,
    /// Creation conflict.
    Exist = 4,
    /// Transport or lower-level failure.
    Io = 5,
    /// Intentionally opaque; e.g. enumeration of a user-namespace boundary.
    Private = 6,
    /// Link-traversal signaling; not itself an application failure.
    BrokenLink = 7,
    /// Not an error: a redirect request asking the client to re-resolve a
    /// link and retry.
    FollowLink = 8,
}

impl Kind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Internal => "internal",
            Kind::Invalid => "invalid",
            Kind::Permission => "permission",
            Kind::NotExist => "not exist",
            Kind::Exist => "exist",
            Kind::Io => "I/O",
            Kind::Private => "private",
            Kind::BrokenLink => "broken link",
            Kind::FollowLink => "follow link",
        }
    }

    /// Whether a caller may retry the call automatically (§7: only
    /// transport-level failures are auto-retried).
    pub const fn is_retryable(self) -> bool {
        matches!(self, Kind::Io)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single error value whose `kind` drives caller behavior (§7).
#[derive(Clone, Debug, Error, Serialize, Deserialize)]
#[error("{kind}: {msg}")]
pub struct Error {
    pub kind: Kind,
    pub msg: String,
}

impl Error {
    pub fn new(kind: Kind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(Kind::Internal, msg)
    }
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::new(Kind::Invalid, msg)
    }
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::new(Kind::Permission, msg)
    }
    pub fn not_exist(msg: impl Into<String>) -> Self {
        Self::new(Kind::NotExist, msg)
    }
    pub fn exist(msg: impl Into<String>) -> Self {
        Self::new(Kind::Exist, msg)
    }
    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(Kind::Io, msg)
    }
    pub fn private(msg: impl Into<String>) -> Self {
        Self::new(Kind::Private, msg)
    }
    pub fn broken_link(msg: impl Into<String>) -> Self {
        Self::new(Kind::BrokenLink, msg)
    }
    /// Not itself a failure: signals the client to re-resolve `target` and
    /// retry the call against it (§7).
    pub fn follow_link(target: impl Into<String>) -> Self {
        Self::new(Kind::FollowLink, target)
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::io(e.to_string())
    }
}

impl From<bcs::Error> for Error {
    fn from(e: bcs::Error) -> Self {
        Error::new(Kind::Invalid, format!("bcs decode failed: {e}"))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
