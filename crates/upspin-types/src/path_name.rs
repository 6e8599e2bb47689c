//! `PathName`: `UserName/elem1/elem2/...`.

use std::fmt;

use serde::{Deserialize, Serialize};
use upspin_error::Error;

use crate::UserName;

/// A parsed Upspin path, always rooted at a [`UserName`].
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathName {
    user: UserName,
    elems: Vec<String>,
}

impl PathName {
    /// Parses `user@domain/elem1/elem2`. A bare `user@domain` (no trailing
    /// elements) is the user's root and is valid.
    pub fn parse(p: impl AsRef<str>) -> Result<Self, Error> {
        let p = p.as_ref();
        let mut split = p.splitn(2, '/');
        let user_str = split.next().unwrap_or("");
        let user = UserName::parse(user_str)?;
        let elems = match split.next() {
            None => Vec::new(),
            Some(rest) => rest
                .split('/')
                .map(|e| {
                    if e.is_empty() {
                        Err(Error::invalid(format!(
                            "path {p:?} has an empty element \
                             (double slash or trailing slash)"
                        )))
                    } else {
                        Ok(e.to_string())
                    }
                })
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Self { user, elems })
    }

    pub fn user(&self) -> &UserName {
        &self.user
    }

    pub fn elements(&self) -> &[String] {
        &self.elems
    }

    /// Whether `self` is the root path of its user (no trailing elements).
    pub fn is_root(&self) -> bool {
        self.elems.is_empty()
    }

    /// The parent path, or `None` if `self` is already a root.
    pub fn parent(&self) -> Option<PathName> {
        if self.elems.is_empty() {
            None
        } else {
            Some(PathName {
                user: self.user.clone(),
                elems: self.elems[..self.elems.len() - 1].to_vec(),
            })
        }
    }

    /// Re-renders the canonical string form. `Path(Parse(p)) == p` for every
    /// valid `p` (§8 Property 2).
    pub fn to_canonical_string(&self) -> String {
        if self.elems.is_empty() {
            self.user.as_str().to_string()
        } else {
            format!("{}/{}", self.user.as_str(), self.elems.join("/"))
        }
    }
}

impl fmt::Display for PathName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}

impl TryFrom<String> for PathName {
    type Error = Error;
    fn try_from(s: String) -> Result<Self, Error> {
        Self::parse(&s)
    }
}

impl From<PathName> for String {
    fn from(p: PathName) -> String {
        p.to_canonical_string()
    }
}

impl std::str::FromStr for PathName {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Error> {
        Self::parse(s)
    }
}

#[cfg(feature = "test-utils")]
impl proptest::arbitrary::Arbitrary for PathName {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        (
            any::<UserName>(),
            proptest::collection::vec("[a-zA-Z0-9_.-]{1,8}", 0..4),
        )
            .prop_map(|(user, elems)| PathName { user, elems })
            .boxed()
    }
}
