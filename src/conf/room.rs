//! Room defaults.

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Defaults applied to rooms created by the server.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Room {
    /// Participant cap of newly created rooms. Defaults to `10`.
    #[default(10)]
    pub max_participants: usize,
}
