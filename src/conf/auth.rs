//! Token issuance and verification settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Settings of JWT credentials issued by the server.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Auth {
    /// Secret used to sign and verify access and refresh tokens.
    ///
    /// The default value is for development only.
    #[default(String::from("secret"))]
    pub jwt_secret: String,

    /// Lifetime of issued access tokens. Defaults to `15m`.
    #[default(Duration::from_secs(15 * 60))]
    #[serde(with = "humantime_serde")]
    pub access_token_ttl: Duration,

    /// Lifetime of issued refresh tokens. Defaults to `7days`.
    #[default(Duration::from_secs(7 * 24 * 60 * 60))]
    #[serde(with = "humantime_serde")]
    pub refresh_token_ttl: Duration,
}
