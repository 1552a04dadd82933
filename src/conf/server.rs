//! HTTP server settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// HTTP server settings.
#[derive(Clone, Debug, Deserialize, Serialize, SmartDefault)]
#[serde(default)]
pub struct Server {
    /// IP address to bind HTTP server to. Defaults to `0.0.0.0`.
    #[default(IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_ip: IpAddr,

    /// Port to bind HTTP server to. Defaults to `3002`.
    #[default(3002)]
    pub bind_port: u16,

    /// Comma-separated list of origins allowed to perform cross-origin
    /// requests. Defaults to `http://localhost:3000`.
    #[default(String::from("http://localhost:3000"))]
    pub allowed_origins: String,

    /// Whether an unknown room ID on the WebSocket path materializes a
    /// placeholder room owned by the connecting user. Permissive by
    /// default; stricter deployments should disable it.
    #[default(true)]
    pub auto_create_rooms: bool,
}

impl Server {
    /// Builds [`SocketAddr`] from `bind_ip` and `bind_port`.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        (self.bind_ip, self.bind_port).into()
    }

    /// Returns the configured allowed origins as separate values.
    #[must_use]
    pub fn origins(&self) -> Vec<String> {
        split_list(&self.allowed_origins)
    }
}

/// Splits a comma-separated configuration value, dropping empty entries.
pub(super) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_combines_ip_and_port() {
        let server = Server::default();

        assert_eq!(server.bind_addr().to_string(), "0.0.0.0:3002");
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let server = Server {
            allowed_origins: "http://a.test, http://b.test,,".to_owned(),
            ..Server::default()
        };

        assert_eq!(
            server.origins(),
            vec!["http://a.test".to_owned(), "http://b.test".to_owned()],
        );
    }
}
