//! Tree configuration loading from file and environment variables.

use arbor_types::DEFAULT_PORT;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level tree configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Trees this one connects out to.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

/// Listener and identity settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Domain this tree introduces itself with.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Seconds an inbound connection may take to authenticate.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Location of the tree's private key.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_key_path")]
    pub private_key_path: PathBuf,

    /// Create a key at `private_key_path` when none exists.
    #[serde(default)]
    pub generate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "arbor_federation=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

/// An operator-configured peer tree.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PeerConfig {
    pub domain: String,
    /// `host:port` to connect to.
    pub address: String,
    /// Hex Ed25519 public key the peer must present.
    pub public_key: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_handshake_timeout_secs() -> u64 {
    30
}

fn default_key_path() -> PathBuf {
    PathBuf::from("arbor.key")
}

fn default_db_path() -> String {
    "arbor.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            domain: default_domain(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            private_key_path: default_key_path(),
            generate: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `ARBOR_HOST` overrides `server.host`
/// - `ARBOR_PORT` overrides `server.port`
/// - `ARBOR_DOMAIN` overrides `server.domain`
/// - `ARBOR_KEY_PATH` overrides `keys.private_key_path`
/// - `ARBOR_DB_PATH` overrides `database.path`
/// - `ARBOR_LOG_LEVEL` overrides `logging.level`
/// - `ARBOR_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed,
/// or if the result fails [`validate`].
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&mut config)?;
    Ok(config)
}

/// Applies `ARBOR_*` overrides read through `lookup`.
///
/// Unparseable host or port values are ignored.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = lookup("ARBOR_HOST").and_then(|host| host.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = lookup("ARBOR_PORT").and_then(|port| port.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(domain) = lookup("ARBOR_DOMAIN") {
        config.server.domain = domain;
    }
    if let Some(key_path) = lookup("ARBOR_KEY_PATH") {
        config.keys.private_key_path = PathBuf::from(key_path);
    }
    if let Some(db_path) = lookup("ARBOR_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = lookup("ARBOR_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("ARBOR_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}

/// Normalizes domains and peer keys and rejects unusable settings.
pub fn validate(config: &mut Config) -> Result<(), ConfigError> {
    config.server.domain = config.server.domain.trim().to_ascii_lowercase();
    if config.server.domain.is_empty() {
        return Err(ConfigError::Invalid("server.domain must not be empty".into()));
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "server.handshake_timeout_secs must be positive".into(),
        ));
    }
    for peer in &mut config.peers {
        peer.domain = peer.domain.trim().to_ascii_lowercase();
        if peer.domain == config.server.domain {
            return Err(ConfigError::Invalid(format!(
                "peer {} has this tree's own domain",
                peer.domain
            )));
        }
        let key = arbor_federation::keys::parse_public_key(&peer.public_key)
            .map_err(|e| ConfigError::Invalid(format!("peer {}: {e}", peer.domain)))?;
        peer.public_key = hex::encode(key.as_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_federation::KeyStore;
    use std::collections::HashMap;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();

        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(config.keys.private_key_path, PathBuf::from("arbor.key"));
        assert_eq!(config.database.pool_max_size, 8);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn file_values_and_peers_are_read() {
        let key = KeyStore::generate().public_key_hex().to_uppercase();
        let mut config: Config = toml::from_str(&format!(
            r#"
            [server]
            domain = "Oak.Example"
            port = 15000

            [keys]
            private_key_path = "/var/lib/arbor/key"
            generate = true

            [[peers]]
            domain = "birch.example"
            address = "birch.example:14404"
            public_key = "{key}"
            "#
        ))
        .unwrap();
        validate(&mut config).unwrap();

        assert_eq!(config.server.domain, "oak.example");
        assert_eq!(config.server.port, 15000);
        assert!(config.keys.generate);
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].public_key, key.to_lowercase());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("ARBOR_PORT", "16000"),
            ("ARBOR_HOST", "not-an-ip"),
            ("ARBOR_DOMAIN", "elm.example"),
            ("ARBOR_DB_PATH", "/tmp/elm.db"),
            ("ARBOR_LOG_JSON", "1"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 16000);
        assert_eq!(config.server.host, default_host());
        assert_eq!(config.server.domain, "elm.example");
        assert_eq!(config.database.path, "/tmp/elm.db");
        assert!(config.logging.json);
    }

    #[test]
    fn malformed_peer_key_is_rejected() {
        let mut config = Config::default();
        config.peers.push(PeerConfig {
            domain: "birch.example".into(),
            address: "127.0.0.1:1".into(),
            public_key: "nothex".into(),
        });
        assert!(matches!(validate(&mut config), Err(ConfigError::Invalid(_))));
    }
}
