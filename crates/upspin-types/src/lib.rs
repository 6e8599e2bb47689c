//! Core Upspin data model: [`UserName`], [`PathName`], [`Endpoint`], and the
//! wire-level entities (`DirEntry`, `User`, `Reference`) that ride on top of
//! the authenticated transport.
//!
//! None of these types know how to dial a network or verify a signature;
//! that's `upspin-crypto` and `upspin-rpc`. This crate is pure parsing,
//! validation, and canonicalization.

pub mod auth_token;
pub mod endpoint;
pub mod entry;
pub mod path_name;
pub mod user_name;

pub use auth_token::AuthToken;
pub use endpoint::{Endpoint, NetAddr, Transport};
pub use entry::{BlockRef, DirEntry, Location, RefData, Reference, User};
pub use path_name::PathName;
pub use user_name::UserName;
