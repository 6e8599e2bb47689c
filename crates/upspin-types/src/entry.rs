//! Wire-level entities exchanged with the Key, Store and Dir services
//! (§6.2). These are intentionally shallow: the packing, encryption, and
//! on-disk format of the blocks they reference are out of scope (§1).

use serde::{Deserialize, Serialize};
use upspin_crypto::PublicKey;

use crate::{Endpoint, PathName, UserName};

/// An opaque identifier for a blob held by a storage service.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Reference(pub String);

impl Reference {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Metadata returned alongside a stored blob's bytes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RefData {
    pub reference: Reference,
    /// Size of the referenced blob in bytes, as reported by the store.
    pub size: u64,
}

/// One of possibly several stores holding a copy of a block, returned by
/// `Store.Get` so that a client can try alternates on failure.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub endpoint: Endpoint,
    pub reference: Reference,
}

/// A single content block within a [`DirEntry`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    pub location: Location,
    /// Offset of this block within the file's logical byte stream.
    pub offset: u64,
    /// Length of this block's plaintext, in bytes.
    pub size: u64,
}

/// Metadata and block list describing a file, directory, or link. The
/// content packing/encryption scheme is opaque to this core (§1); `packdata`
/// is carried verbatim.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: PathName,
    pub is_dir: bool,
    /// `Some(target)` iff this entry is a symbolic link.
    pub link_target: Option<PathName>,
    pub blocks: Vec<BlockRef>,
    /// Opaque packing metadata, interpreted only by the packing layer.
    pub packdata: Vec<u8>,
    /// Monotonically increasing per-entry revision, used as the `order` in
    /// `Watch` events (§4.10).
    pub sequence: u64,
    /// Unix timestamp (seconds) of last modification.
    pub time: u64,
}

impl DirEntry {
    pub fn new_dir(name: PathName, sequence: u64, time: u64) -> Self {
        Self {
            name,
            is_dir: true,
            link_target: None,
            blocks: Vec::new(),
            packdata: Vec::new(),
            sequence,
            time,
        }
    }

    pub fn new_link(name: PathName, target: PathName, sequence: u64, time: u64) -> Self {
        Self {
            name,
            is_dir: false,
            link_target: Some(target),
            blocks: Vec::new(),
            packdata: Vec::new(),
            sequence,
            time,
        }
    }

    pub fn is_link(&self) -> bool {
        self.link_target.is_some()
    }
}

/// The key service's record for a user (§3 "User record").
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: UserName,
    pub dirs: Vec<Endpoint>,
    pub stores: Vec<Endpoint>,
    pub public_key: PublicKey,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dir_entry_bcs_roundtrip() {
        let name = PathName::parse("alice@example.com/dir/file").unwrap();
        let entry = DirEntry {
            name,
            is_dir: false,
            link_target: None,
            blocks: vec![BlockRef {
                location: Location {
                    endpoint: Endpoint::remote("store.example.com:443"),
                    reference: Reference::new("abc123"),
                },
                offset: 0,
                size: 42,
            }],
            packdata: vec![1, 2, 3],
            sequence: 7,
            time: 1_700_000_000,
        };
        let bytes = bcs::to_bytes(&entry).unwrap();
        let decoded: DirEntry = bcs::from_bytes(&bytes).unwrap();
        assert_eq!(entry, decoded);
    }

    #[test]
    fn link_entries_report_is_link() {
        let name = PathName::parse("alice@example.com/shortcut").unwrap();
        let target = PathName::parse("bob@example.com/real").unwrap();
        let entry = DirEntry::new_link(name, target, 1, 0);
        assert!(entry.is_link());
    }
}
