//! Redis backplane settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Settings of the [Redis] server used as the Pub/Sub backplane and
/// membership store.
///
/// [Redis]: https://redis.io
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Redis {
    /// URL of the Redis server. Defaults to `redis://127.0.0.1:6379`.
    #[default(String::from("redis://127.0.0.1:6379"))]
    pub url: String,

    /// Timeout for establishing and verifying a connection.
    /// Defaults to `5s`.
    #[default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for the subscribe acknowledgement round-trip.
    /// Defaults to `5s`.
    #[default(Duration::from_secs(5))]
    #[serde(with = "humantime_serde")]
    pub subscribe_timeout: Duration,

    /// Maximum size of the command connection pool. Defaults to `16`.
    #[default(16)]
    pub pool_size: usize,
}
