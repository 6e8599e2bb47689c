//! The universal `Ping` method every service exposes (§6.2), used both for
//! explicit liveness checks and the transport client's keep-alive task
//! (§4.3, §4.8).

use serde::{Deserialize, Serialize};

/// `Ping(seq) -> seq`: the server must echo back the same sequence number.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PingArgs {
    pub seq: u32,
}
