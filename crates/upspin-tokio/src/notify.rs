//! # `notify` channel
//!
//! A small notification channel wrapping [`tokio::sync::mpsc`] with the
//! property that if multiple notifications are sent before the receiver
//! calls [`Receiver::recv`], the receiver is only notified once — useful for
//! coalescing repeated "something changed" signals (the `Watch` `done`
//! channel of §4.10, and keep-alive wakeups of §4.3).

use tokio::sync::mpsc;

/// Creates a new `notify` channel: a cloneable [`Sender`] and a
/// non-cloneable [`Receiver`], analogous to `mpsc::channel(1)`.
pub fn channel() -> (Sender, Receiver) {
    let (tx, rx) = mpsc::channel(1);
    (Sender(tx), Receiver(rx))
}

/// `notify` sender, analogous to `mpsc::Sender<()>`.
#[derive(Clone)]
pub struct Sender(mpsc::Sender<()>);

/// `notify` receiver, analogous to `mpsc::Receiver<()>`.
pub struct Receiver(mpsc::Receiver<()>);

impl Sender {
    /// Sends a notification. Never blocks; drops the notification silently
    /// if the channel is full (a pending notification already covers it) or
    /// the receiver has been dropped.
    pub fn send(&self) {
        let _ = self.0.try_send(());
    }
}

impl Receiver {
    /// Waits until a notification is received. Completes immediately if one
    /// is already pending. If every [`Sender`] has been dropped, this
    /// future never completes — callers should race it against something
    /// else in a `select!`.
    pub async fn recv(&mut self) {
        match self.0.recv().await {
            Some(()) => (),
            None => std::future::pending().await,
        }
    }

    /// Returns immediately with whether a notification was pending.
    #[must_use]
    pub fn try_recv(&mut self) -> bool {
        self.0.try_recv().is_ok()
    }

    /// Clears out any pending notification.
    pub fn clear(&mut self) {
        while self.0.try_recv().is_ok() {}
    }
}
