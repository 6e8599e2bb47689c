//! `UserName`: `local@domain`, syntactically validated and canonicalized.

use std::fmt;

use serde::{Deserialize, Serialize};
use upspin_error::{Error, Kind};

/// A validated Upspin user name, e.g. `alice@example.com`.
///
/// Canonicalization is stable: `UserName::parse(u.as_str()) == Ok(u)` for
/// every `u` (§8 Property 2 analogue for user names).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserName(String);

impl UserName {
    /// Parses and validates a user name string.
    ///
    /// Rules: exactly one `@`, non-empty local part, non-empty lowercase
    /// domain part containing at least one `.`.
    pub fn parse(s: impl AsRef<str>) -> Result<Self, Error> {
        let s = s.as_ref();
        let mut parts = s.splitn(2, '@');
        let local = parts.next().unwrap_or("");
        let domain = match parts.next() {
            Some(d) => d,
            None =>
                return Err(Error::invalid(format!(
                    "user name {s:?} is missing '@'"
                ))),
        };
        if local.is_empty() {
            return Err(Error::invalid(format!(
                "user name {s:?} has an empty local part"
            )));
        }
        if domain.is_empty() || !domain.contains('.') {
            return Err(Error::invalid(format!(
                "user name {s:?} has an invalid domain"
            )));
        }
        if domain.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(Error::invalid(format!(
                "user name {s:?} domain must be lowercase"
            )));
        }
        if s.contains(['/', '\0']) {
            return Err(Error::invalid(format!(
                "user name {s:?} contains an illegal character"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part of the name before `@`.
    pub fn local(&self) -> &str {
        self.0.split('@').next().expect("validated at construction")
    }

    /// The part of the name after `@`.
    pub fn domain(&self) -> &str {
        self.0.rsplit('@').next().expect("validated at construction")
    }
}

impl fmt::Display for UserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserName {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Error> {
        Self::parse(&s)
    }
}

impl From<UserName> for String {
    fn from(u: UserName) -> String {
        u.0
    }
}

impl std::str::FromStr for UserName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        Self::parse(s)
    }
}

#[cfg(feature = "test-utils")]
impl proptest::arbitrary::Arbitrary for UserName {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        "[a-z][a-z0-9]{0,8}"
            .prop_flat_map(|local| {
                "[a-z][a-z0-9]{0,8}"
                    .prop_map(move |tld| format!("{local}@example.{tld}"))
            })
            .prop_map(|s| UserName::parse(s).expect("constructed valid"))
            .boxed()
    }
}
