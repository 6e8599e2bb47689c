//! The Directory, Storage and Key facades (§4.6) and the user-key cache
//! (§4.7): thin typed wrappers over an authenticated `upspin_rpc`
//! transport client, plus a bounded, TTL-expiring cache in front of Key.

pub mod binder;
pub mod dir;
pub mod key;
pub mod store;
pub mod user_cache;

pub use binder::ServiceBinder;
pub use dir::DirClient;
pub use key::KeyClient;
pub use store::StoreClient;
pub use user_cache::UserKeyCache;
