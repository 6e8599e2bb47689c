//! Structured task concurrency helpers.
//!
//! Every background task in this workspace (keep-alive pings, watch-stream
//! pumps) is spawned as a named, joinable [`Task`] rather than a bare
//! fire-and-forget `tokio::spawn` — §5's resource discipline requires that
//! every long-lived background task have exactly one owner.

pub mod notify;
pub mod task;

pub use notify::{Receiver as NotifyReceiver, Sender as NotifySender};
pub use task::Task;
