//! The `Watch` directory-event stream (§4.10): a bounded channel per
//! subscriber feeding a length-framed HTTP/2 streaming response body on the
//! server side, and a decoding consumer on the client side. The `done`
//! channel reuses the coalesced-notify pattern of the keep-alive task
//! (§4.3), so a subscriber drop and an explicit done-signal converge on the
//! same cleanup path.

use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use upspin_error::Error;
use upspin_tokio::{NotifyReceiver, NotifySender};
use upspin_types::DirEntry;

/// One event on a `Watch` stream. The leading event on every stream carries
/// only `error` (`None` if the watch was installed); every subsequent event
/// carries an `entry`, a delete-vs-upsert flag, and a strictly increasing
/// `order`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatchEvent {
    pub error: Option<Error>,
    pub entry: Option<DirEntry>,
    pub delete: bool,
    pub order: i64,
}

impl WatchEvent {
    pub fn leading_ok() -> Self {
        Self {
            error: None,
            entry: None,
            delete: false,
            order: 0,
        }
    }

    pub fn leading_error(error: Error) -> Self {
        Self {
            error: Some(error),
            entry: None,
            delete: false,
            order: 0,
        }
    }

    pub fn upsert(entry: DirEntry, order: i64) -> Self {
        Self {
            error: None,
            entry: Some(entry),
            delete: false,
            order,
        }
    }

    pub fn delete(entry: DirEntry, order: i64) -> Self {
        Self {
            error: None,
            entry: Some(entry),
            delete: true,
            order,
        }
    }
}

/// Frames a single event as a 4-byte little-endian length prefix followed
/// by its `bcs` encoding, so a byte stream whose chunk boundaries don't
/// align with event boundaries can still be split back into events.
pub(crate) fn encode_event(event: &WatchEvent) -> Bytes {
    let payload = bcs::to_bytes(event).expect("watch event encoding is infallible");
    let mut framed = BytesMut::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    framed.extend_from_slice(&payload);
    framed.freeze()
}

fn decode_event(bytes: &[u8]) -> Result<WatchEvent, Error> {
    bcs::from_bytes(bytes).map_err(Error::from)
}

/// Accumulates raw stream chunks and yields complete, length-framed events
/// regardless of how the underlying transport split them into chunks.
pub(crate) struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub(crate) fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Returns the next complete event, or `None` if the buffer doesn't yet
    /// hold a full frame.
    pub(crate) fn next_event(&mut self) -> Option<Result<WatchEvent, Error>> {
        if self.buf.len() < 4 {
            return None;
        }
        let len = u32::from_le_bytes(self.buf[..4].try_into().expect("checked above")) as usize;
        if self.buf.len() < 4 + len {
            return None;
        }
        self.buf.advance(4);
        let frame = self.buf.split_to(len);
        Some(decode_event(&frame))
    }
}

/// Server side of a `Watch` subscription (§4.10, §5). The method
/// implementation pushes events here; [`Dispatcher`](crate::dispatch)
/// drains the paired [`WatchStream`] into the HTTP response body.
pub struct WatchProducer {
    tx: mpsc::Sender<WatchEvent>,
}

impl WatchProducer {
    /// Pushes an event, returning `false` if the subscriber's bounded queue
    /// is full. Per §4.10, a full queue means the server must send a final
    /// error event and close: callers should follow a `false` return with
    /// [`Self::close_with_overflow`].
    pub async fn send(&self, event: WatchEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn try_send(&self, event: WatchEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    /// Sends a terminal overflow error, best-effort, ignoring a full queue
    /// (there is nothing further to do if even the error can't be
    /// delivered; the stream ends either way once this producer drops).
    pub async fn close_with_overflow(self) {
        let _ = self
            .tx
            .send(WatchEvent::leading_error(Error::io(
                "watch event queue overflowed",
            )))
            .await;
    }
}

/// Server side of a `Watch` subscription's event queue, adapted into a byte
/// stream suitable for `axum::body::Body::from_stream`.
pub struct WatchStream {
    rx: mpsc::Receiver<WatchEvent>,
}

/// Creates a bounded producer/stream pair for one `Watch` subscriber.
pub fn channel(capacity: usize) -> (WatchProducer, WatchStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (WatchProducer { tx }, WatchStream { rx })
}

impl futures::Stream for WatchStream {
    type Item = Result<Bytes, Error>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|opt| opt.map(|event| Ok(encode_event(&event))))
    }
}

/// Client side of a `Watch` subscription (§4.10). Dropping this (or calling
/// [`Self::close`]) releases the background task driving the underlying
/// HTTP/2 stream and the server-side resources it holds.
pub struct WatchSubscription {
    rx: mpsc::Receiver<Result<WatchEvent, Error>>,
    done: NotifySender,
    _task: upspin_tokio::Task<()>,
}

impl WatchSubscription {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<WatchEvent, Error>>,
        done: NotifySender,
        task: upspin_tokio::Task<()>,
    ) -> Self {
        Self {
            rx,
            done,
            _task: task,
        }
    }

    /// Waits for the next event. Returns `None` once the stream has ended
    /// (server close, done-signal, or a transport error already surfaced).
    pub async fn recv(&mut self) -> Option<Result<WatchEvent, Error>> {
        self.rx.recv().await
    }

    /// Signals the background task to stop reading and release the
    /// connection. Idempotent; also happens implicitly on drop.
    pub fn close(&self) {
        self.done.send();
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

pub(crate) fn done_channel() -> (NotifySender, NotifyReceiver) {
    upspin_tokio::notify::channel()
}

/// Drives a raw chunk stream (the `Watch` HTTP response body) into a
/// [`WatchSubscription`]: decodes length-framed [`WatchEvent`]s as chunks
/// arrive and stops reading as soon as either the stream ends or the
/// subscription is closed (§4.10, §5 "Cancelling a Watch must release the
/// associated server-side resources promptly").
pub(crate) fn spawn_client_watch<S>(mut chunks: S) -> WatchSubscription
where
    S: futures::Stream<Item = Result<Bytes, Error>> + Send + Unpin + 'static,
{
    use futures::StreamExt;

    let (tx, rx) = mpsc::channel(32);
    let (done_tx, mut done_rx) = done_channel();

    let task = upspin_tokio::Task::spawn("upspin-rpc-watch-client", async move {
        let mut decoder = FrameDecoder::new();
        loop {
            tokio::select! {
                biased;
                () = done_rx.recv() => return,
                next = chunks.next() => {
                    let Some(chunk) = next else { return };
                    match chunk {
                        Ok(bytes) => {
                            decoder.push(&bytes);
                            while let Some(event) = decoder.next_event() {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                    }
                }
            }
        }
    });

    WatchSubscription::new(rx, done_tx, task)
}
