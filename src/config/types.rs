//! Core configuration types and loading.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::defaults::*;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Bouncer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// IRC protocol settings (`[irc.bnc]`, `[[irc.network]]`).
    #[serde(default)]
    pub irc: IrcConfig,
    /// Scheduler tick policy.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// The raw document, for dotted-path lookups.
    #[serde(skip)]
    raw: toml::Table,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    /// Look up a value by dotted path, e.g. `irc.bnc.listen` or
    /// `irc.network.0.name`. Numeric segments index arrays.
    pub fn get(&self, path: &str) -> Option<&toml::Value> {
        let mut segments = path.split('.');
        let mut current = self.raw.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                toml::Value::Table(table) => table.get(segment)?,
                toml::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Dotted-path lookup of a string value.
    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(toml::Value::as_str)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let mut config: Config = toml::from_str(content)?;
        config.raw = toml::from_str(content)?;
        Ok(config)
    }
}

/// The `[irc]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IrcConfig {
    /// Local listener and authentication.
    #[serde(default)]
    pub bnc: BncConfig,
    /// Upstream networks, one `[[irc.network]]` block each.
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkConfig>,
}

/// Local bouncer listener and registration policy (`[irc.bnc]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BncConfig {
    /// Listen address, e.g. `127.0.0.1:6667`.
    pub listen: Option<String>,
    /// Prefix used on locally generated lines.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    /// Name advertised in `RPL_ISUPPORT`.
    #[serde(default = "default_network_name")]
    pub network_name: String,
    /// PASS must equal this.
    pub require_pass: Option<String>,
    /// Registration NICK must equal this.
    pub require_nick: Option<String>,
    /// USER username must equal this.
    pub require_user: Option<String>,
    /// USER real name must equal this.
    pub require_name: Option<String>,
    /// Accept any client once NICK and USER are known.
    #[serde(default)]
    pub no_authentication: bool,
    /// Text file sent as the MOTD.
    pub motd_file: Option<String>,
    /// Failed PASS attempts tolerated before disconnecting.
    #[serde(default = "default_max_auth_attempts")]
    pub max_auth_attempts: u32,
    /// Seconds a client may take to register.
    #[serde(default = "default_registration_timeout")]
    pub registration_timeout: u64,
    /// Seconds between listen attempts after a failed bind.
    #[serde(default = "default_listen_retry")]
    pub listen_retry: u64,
}

impl Default for BncConfig {
    fn default() -> Self {
        Self {
            listen: None,
            server_name: default_server_name(),
            network_name: default_network_name(),
            require_pass: None,
            require_nick: None,
            require_user: None,
            require_name: None,
            no_authentication: false,
            motd_file: None,
            max_auth_attempts: default_max_auth_attempts(),
            registration_timeout: default_registration_timeout(),
            listen_retry: default_listen_retry(),
        }
    }
}

impl BncConfig {
    pub fn registration_timeout(&self) -> Duration {
        Duration::from_secs(self.registration_timeout)
    }

    pub fn listen_retry(&self) -> Duration {
        Duration::from_secs(self.listen_retry)
    }

    /// Whether any credential check is configured.
    pub fn has_credentials(&self) -> bool {
        self.require_pass.is_some()
            || self.require_nick.is_some()
            || self.require_user.is_some()
            || self.require_name.is_some()
    }
}

/// One upstream network (`[[irc.network]]`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkConfig {
    /// Short name used in bus messages and local channel names.
    pub name: String,
    /// `host:port` of the upstream server.
    pub address: String,
    pub nick: String,
    /// Username; defaults to the nick.
    pub user: Option<String>,
    /// Real name; defaults to the nick.
    pub realname: Option<String>,
    /// Server password sent as PASS.
    pub password: Option<String>,
    /// Channels joined after registration.
    #[serde(default)]
    pub channels: Vec<String>,
    /// Seconds to wait before reconnecting.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay: u64,
}

impl NetworkConfig {
    pub fn user(&self) -> &str {
        self.user.as_deref().unwrap_or(&self.nick)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nick)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }
}

/// Tick-rate policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThrottleKind {
    None,
    Fixed,
    Adaptive,
}

/// `[scheduler]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchedulerConfig {
    #[serde(default = "default_throttle")]
    pub throttle: ThrottleKind,
    /// Tick length in milliseconds for `fixed` and `adaptive`.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            throttle: default_throttle(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
[irc.bnc]
listen = "127.0.0.1:6667"
require-pass = "hunter2"
max-auth-attempts = 5

[[irc.network]]
name = "libera"
address = "irc.libera.chat:6667"
nick = "bouncer"
channels = ["#rust", "#irc"]

[scheduler]
throttle = "fixed"
tick-ms = 25
"##;

    #[test]
    fn parses_typed_view() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.irc.bnc.listen.as_deref(), Some("127.0.0.1:6667"));
        assert_eq!(config.irc.bnc.max_auth_attempts, 5);
        assert_eq!(config.irc.bnc.registration_timeout, 30);
        assert_eq!(config.irc.bnc.server_name, "ircbnc");
        assert!(config.irc.bnc.has_credentials());

        let net = &config.irc.networks[0];
        assert_eq!(net.user(), "bouncer");
        assert_eq!(net.channels, vec!["#rust", "#irc"]);
        assert_eq!(net.reconnect_delay, 30);

        assert_eq!(config.scheduler.throttle, ThrottleKind::Fixed);
        assert_eq!(config.scheduler.tick(), Duration::from_millis(25));
    }

    #[test]
    fn dotted_path_lookup() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.get_str("irc.bnc.listen"), Some("127.0.0.1:6667"));
        assert_eq!(config.get_str("irc.network.0.name"), Some("libera"));
        assert_eq!(
            config.get("irc.bnc.max-auth-attempts").and_then(|v| v.as_integer()),
            Some(5)
        );
        assert!(config.get("irc.bnc.missing").is_none());
        assert!(config.get("irc.network.7").is_none());
        assert!(config.get("irc.bnc.listen.deeper").is_none());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert!(config.irc.bnc.listen.is_none());
        assert!(config.irc.networks.is_empty());
        assert_eq!(config.scheduler.throttle, ThrottleKind::Adaptive);
    }

    #[test]
    fn parse_error_is_reported() {
        let err = "irc = [".parse::<Config>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ircbnc.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.irc.networks.len(), 1);

        let missing = Config::load(dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io(_)));
    }
}
