//! `AuthToken`: an opaque, server-issued bearer credential (§3).

use std::fmt;

use serde::{Deserialize, Serialize};

/// An opaque printable bearer token, always at least 16 bytes of entropy
/// before hex-encoding (§3, §8 Property 4). Usable only against the server
/// that issued it.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps an already-encoded token string. Does not itself generate
    /// entropy; see `upspin-rpc`'s session authenticator for minting.
    pub fn from_encoded(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Deliberately terse Debug: never print the token in full in logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "AuthToken({prefix}...)")
    }
}

impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
