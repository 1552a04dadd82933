//! Provides application configuration options.

pub mod auth;
pub mod ice;
pub mod redis;
pub mod room;
pub mod rpc;
pub mod server;
pub mod shutdown;

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[doc(inline)]
pub use self::{
    auth::Auth, ice::Ice, redis::Redis, room::Room, rpc::Rpc, server::Server,
    shutdown::Shutdown,
};

/// CLI argument that is responsible for holding application configuration
/// file path.
static APP_CONF_PATH_CMD_ARG_NAME: &str = "--conf";

/// Environment variable that is responsible for holding application
/// configuration file path.
static APP_CONF_PATH_ENV_VAR_NAME: &str = "IRIS_CONF";

/// Holds application config.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Conf {
    /// HTTP server settings.
    pub server: Server,

    /// Client session settings.
    pub rpc: Rpc,

    /// Token issuance and verification settings.
    pub auth: Auth,

    /// Redis backplane settings.
    pub redis: Redis,

    /// ICE servers advertised to clients.
    pub ice: Ice,

    /// Room defaults.
    pub room: Room,

    /// Graceful shutdown settings.
    pub shutdown: Shutdown,
}

impl Conf {
    /// Creates new [`Conf`] and applies values from the following sources
    /// (in the ascending priority order):
    ///
    /// 1. Default values;
    /// 2. Configuration file, the name of which is given as a command line
    ///    parameter or environment variable;
    /// 3. Environment variables with `IRIS__` prefix.
    ///
    /// # Errors
    ///
    /// Errors if any occurs while reading or merging the configuration
    /// sources.
    pub fn parse() -> Result<Self, ConfigError> {
        let mut cfg = Config::new();

        if let Some(path) = get_conf_file_name(env::args()) {
            cfg.merge(File::with_name(&path))?;
        }
        cfg.merge(Environment::with_prefix("IRIS").separator("__"))?;

        cfg.try_into()
    }
}

/// Returns the path to the configuration file, if provided: the
/// `IRIS_CONF` environment variable takes priority over the `--conf`
/// command line argument.
fn get_conf_file_name<T>(args: T) -> Option<String>
where
    T: IntoIterator<Item = String>,
{
    env::var(APP_CONF_PATH_ENV_VAR_NAME)
        .ok()
        .or_else(|| {
            let mut args = args
                .into_iter()
                .skip_while(|arg| arg != APP_CONF_PATH_CMD_ARG_NAME);
            args.next().and_then(|_| args.next())
        })
        .filter(|path| !path.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn args(list: &[&str]) -> impl IntoIterator<Item = String> {
        list.iter()
            .map(|s| (*s).to_owned())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn conf_file_name_from_cmd_args() {
        assert_eq!(
            get_conf_file_name(args(&["--conf", "iris.toml"])),
            Some("iris.toml".to_owned()),
        );
        assert_eq!(get_conf_file_name(args(&["--conf"])), None);
        assert_eq!(get_conf_file_name(args(&["--conf", ""])), None);
        assert_eq!(get_conf_file_name(args(&["iris.toml"])), None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let conf = Conf::default();

        assert_eq!(conf.server.bind_port, 3002);
        assert_eq!(conf.room.max_participants, 10);
        assert_eq!(conf.ice.urls().len(), 5);
        assert_eq!(conf.rpc.idle_timeout, Duration::from_secs(10));
        assert_eq!(conf.redis.subscribe_timeout, Duration::from_secs(5));
        assert_eq!(conf.shutdown.timeout, Duration::from_secs(10));
    }
}
