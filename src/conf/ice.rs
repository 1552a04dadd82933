//! ICE servers advertised to clients.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

use super::server::split_list;

/// Settings of ICE servers advertised to clients for WebRTC candidate
/// gathering.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Ice {
    /// Comma-separated list of STUN/TURN URLs, delivered to clients
    /// verbatim and never validated by the server.
    ///
    /// Defaults to five Google STUN servers.
    #[default(String::from(
        "stun:stun.l.google.com:19302,\
         stun:stun1.l.google.com:19302,\
         stun:stun2.l.google.com:19302,\
         stun:stun3.l.google.com:19302,\
         stun:stun4.l.google.com:19302"
    ))]
    pub servers: String,
}

impl Ice {
    /// Returns the configured ICE server URLs as separate values.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        split_list(&self.servers)
    }
}
