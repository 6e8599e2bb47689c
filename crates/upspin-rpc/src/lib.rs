//! The authenticated remote-service protocol (§4): session authentication,
//! wire message encoding, the transport client, the local-loopback
//! transport, and the universal `Ping` method.

pub mod auth;
pub mod dispatch;
pub mod headers;
pub mod local;
pub mod message;
pub mod ping;
pub mod session;
pub mod transport;
pub mod watch;

pub use auth::{AuthHeaders, Authenticated, Authenticator, KeyLookup};
pub use dispatch::{
    Dialer, Dispatcher, DispatcherBuilder, HandlerOutcome, MethodHandler, WatchHandler,
    typed_method, typed_watch_method,
};
pub use ping::PingArgs;
pub use session::{Session, SessionCache};
pub use transport::{
    ClientConfig, ClientIdentity, Security, TransportClient,
    DEFAULT_KEEP_ALIVE_INTERVAL, MIN_KEEP_ALIVE_INTERVAL,
};
pub use watch::{WatchEvent, WatchProducer, WatchStream, WatchSubscription};
