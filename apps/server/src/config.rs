//! # Server Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_PORT=9000                                                    │
//! │     TALLY_DB_PATH=/var/lib/tally/tally.db                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     --config <path> or TALLY_CONFIG, else                              │
//! │     ~/.config/tally/tally.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.tally.tally/tally.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0"
//! port = 8080
//!
//! [database]
//! path = "./tally.db"
//! max_connections = 8
//! busy_timeout_ms = 5000
//!
//! [checkout]
//! commit_timeout_ms = 10000
//! max_attempts = 3
//! initial_backoff_ms = 50
//! max_backoff_ms = 1000
//! idempotency_ttl_hours = 24
//! purge_interval_secs = 3600
//!
//! [loyalty]
//! rate = 1.0  # points per currency unit
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use tally_checkout::CheckoutSettings;
use tally_core::loyalty::MAX_POINTS_PER_UNIT;
use tally_core::LoyaltyRate;
use tally_db::DbConfig;

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            bind_addr: default_bind_addr(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long SQLite waits on a locked database before reporting busy.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tally.db")
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSection {
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: u64,

    /// How often expired idempotency keys are deleted.
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

fn default_commit_timeout_ms() -> u64 {
    10_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    50
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_idempotency_ttl_hours() -> u64 {
    24
}

fn default_purge_interval_secs() -> u64 {
    3_600
}

impl Default for CheckoutSection {
    fn default() -> Self {
        CheckoutSection {
            commit_timeout_ms: default_commit_timeout_ms(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            idempotency_ttl_hours: default_idempotency_ttl_hours(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoyaltySettings {
    /// Points per currency unit.
    #[serde(default = "default_loyalty_rate")]
    pub rate: f64,
}

fn default_loyalty_rate() -> f64 {
    1.0
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        LoyaltySettings {
            rate: default_loyalty_rate(),
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Complete server configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: HttpSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub checkout: CheckoutSection,

    #[serde(default)]
    pub loyalty: LoyaltySettings,
}

impl ServerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tally.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        let explicit = config_path.or_else(|| std::env::var("TALLY_CONFIG").ok().map(PathBuf::from));
        match explicit {
            // A path the operator named must exist
            Some(path) => {
                info!(?path, "Loading config from file");
                config = Self::from_toml(&std::fs::read_to_string(&path)?)?;
            }
            None => {
                if let Some(path) = Self::default_config_path() {
                    if path.exists() {
                        info!(?path, "Loading config from file");
                        config = Self::from_toml(&std::fs::read_to_string(&path)?)?;
                    } else {
                        debug!(?path, "Config file not found, using defaults");
                    }
                }
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be greater than 0".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.checkout.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "checkout.max_attempts must be greater than 0".into(),
            ));
        }
        if self.checkout.commit_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "checkout.commit_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.checkout.initial_backoff_ms > self.checkout.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "checkout.initial_backoff_ms must not exceed max_backoff_ms".into(),
            ));
        }
        if self.checkout.idempotency_ttl_hours == 0 {
            return Err(ConfigError::Invalid(
                "checkout.idempotency_ttl_hours must be greater than 0".into(),
            ));
        }
        if self.checkout.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "checkout.purge_interval_secs must be greater than 0".into(),
            ));
        }
        if !self.loyalty.rate.is_finite() || !(0.0..=MAX_POINTS_PER_UNIT).contains(&self.loyalty.rate) {
            return Err(ConfigError::Invalid(format!(
                "loyalty.rate must be between 0 and {MAX_POINTS_PER_UNIT}, got {}",
                self.loyalty.rate
            )));
        }
        Ok(())
    }

    /// Applies `TALLY_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = var("TALLY_BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(path) = var("TALLY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        override_parsed(&var, "TALLY_PORT", &mut self.server.port);
        override_parsed(&var, "TALLY_DB_MAX_CONNECTIONS", &mut self.database.max_connections);
        override_parsed(&var, "TALLY_DB_BUSY_TIMEOUT_MS", &mut self.database.busy_timeout_ms);
        override_parsed(&var, "TALLY_COMMIT_TIMEOUT_MS", &mut self.checkout.commit_timeout_ms);
        override_parsed(&var, "TALLY_MAX_ATTEMPTS", &mut self.checkout.max_attempts);
        override_parsed(&var, "TALLY_IDEMPOTENCY_TTL_HOURS", &mut self.checkout.idempotency_ttl_hours);
        override_parsed(&var, "TALLY_PURGE_INTERVAL_SECS", &mut self.checkout.purge_interval_secs);
        override_parsed(&var, "TALLY_LOYALTY_RATE", &mut self.loyalty.rate);
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tally", "tally")
            .map(|dirs| dirs.config_dir().join("tally.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    pub fn socket_addr(&self) -> ConfigResult<SocketAddr> {
        format!("{}:{}", self.server.bind_addr, self.server.port)
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(format!(
                    "server.bind_addr '{}' is not an IP address",
                    self.server.bind_addr
                ))
            })
    }

    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn checkout_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            commit_timeout: Duration::from_millis(self.checkout.commit_timeout_ms),
            max_attempts: self.checkout.max_attempts,
            initial_backoff: Duration::from_millis(self.checkout.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.checkout.max_backoff_ms),
            idempotency_ttl: Duration::from_secs(self.checkout.idempotency_ttl_hours * 3_600),
            loyalty_rate: LoyaltyRate::from_points_per_unit(self.loyalty.rate),
        }
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.checkout.purge_interval_secs)
    }
}

fn override_parsed<T: std::str::FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(value) => *target = value,
            Err(_) => warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.checkout.max_attempts, 3);
        assert_eq!(config.checkout_settings().commit_timeout, Duration::from_secs(10));
        assert_eq!(config.checkout_settings().loyalty_rate.bps(), 10_000);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            [server]
            port = 9000

            [loyalty]
            rate = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_addr, "0.0.0.0");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.checkout_settings().loyalty_rate.bps(), 2_500);
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("TALLY_PORT", "7000"),
            ("TALLY_DB_PATH", "/tmp/other.db"),
            ("TALLY_MAX_ATTEMPTS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.checkout.max_attempts, 3);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        config.checkout.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.loyalty.rate = -1.0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.loyalty.rate = 1_000.0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.loyalty.rate = MAX_POINTS_PER_UNIT;
        assert!(config.validate().is_ok());

        let mut config = ServerConfig::default();
        config.checkout.initial_backoff_ms = 5_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().unwrap().port(), 8080);

        let mut config = ServerConfig::default();
        config.server.bind_addr = "not-an-ip".into();
        assert!(config.socket_addr().is_err());
    }
}
