//! # Configuration Management
//!
//! Centralized configuration for the puzzle gate server and client.
//!
//! The protocol handlers never see [`GateConfig`] directly. They depend on the
//! narrow capability traits [`IssuerConfig`], [`SolverConfig`] and
//! [`ListenerConfig`], which `GateConfig` implements, so tests and embedders
//! can supply their own sources.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Environment variables via `from_env()` (`POW_GATE_*`)
//! - Direct instantiation with defaults
//!
//! ## Security Considerations
//! - Each unit of difficulty multiplies the expected client work by 16
//! - A short TTL limits how long an unredeemed puzzle occupies the registry
//! - The connection timeout bounds slowloris-style idle connections

use crate::error::{ProtocolError, Result};
use crate::utils::registry::DEFAULT_CLEAN_INTERVAL;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Leading hex zeros required by default
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Default puzzle lifetime
pub const DEFAULT_PUZZLE_TTL: Duration = Duration::from_secs(30);

/// Default solver bound
pub const DEFAULT_MAX_ATTEMPTS: u64 = 10_000_000;

/// Longest digest prefix a difficulty can demand
pub const MAX_DIFFICULTY: u32 = 40;

/// Puzzle settings needed to issue and redeem puzzles
pub trait IssuerConfig: Send + Sync {
    fn puzzle_ttl(&self) -> Duration;
    fn puzzle_difficulty(&self) -> u32;
}

/// Puzzle settings needed to solve puzzles
pub trait SolverConfig: Send + Sync {
    fn puzzle_compute_max_attempts(&self) -> u64;
}

/// Settings for the TCP listener lifecycle
pub trait ListenerConfig: Send + Sync {
    fn listen_address(&self) -> &str;
    fn shutdown_timeout(&self) -> Duration;
    fn connection_timeout(&self) -> Duration;
    /// `None` accepts connections without limit
    fn max_connections(&self) -> Option<usize>;
    /// Zero disables the registry sweep
    fn registry_clean_interval(&self) -> Duration;
}

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GateConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub puzzle: PuzzleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GateConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `POW_GATE_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("POW_GATE_SERVER_ADDRESS") {
            self.server.address = addr.clone();
            self.client.address = addr;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "POW_GATE_CONNECTION_TIMEOUT_MS")? {
            self.server.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "POW_GATE_SHUTDOWN_TIMEOUT_MS")? {
            self.server.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<usize>(&lookup, "POW_GATE_MAX_CONNECTIONS")? {
            self.server.max_connections = Some(max);
        }
        if let Some(difficulty) = parse_var::<u32>(&lookup, "POW_GATE_DIFFICULTY")? {
            self.puzzle.difficulty = difficulty;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "POW_GATE_PUZZLE_TTL_MS")? {
            self.puzzle.ttl = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var::<u64>(&lookup, "POW_GATE_MAX_ATTEMPTS")? {
            self.puzzle.compute_max_attempts = attempts;
        }
        Ok(())
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.puzzle.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate only what a client uses; the server section is ignored so
    /// the address may be a hostname.
    pub fn validate_client(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.client.validate());
        errors.extend(self.puzzle.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        strict(self.validate())
    }

    /// [`GateConfig::validate_client`] as a Result
    pub fn validate_client_strict(&self) -> Result<()> {
        strict(self.validate_client())
    }
}

fn strict(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ProtocolError::ConfigError(format!(
            "Configuration validation failed:\n  - {}",
            errors.join("\n  - ")
        )))
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| ProtocolError::ConfigError(format!("Invalid value for {name}: '{raw}'")))
        })
        .transpose()
}

impl IssuerConfig for GateConfig {
    fn puzzle_ttl(&self) -> Duration {
        self.puzzle.ttl
    }

    fn puzzle_difficulty(&self) -> u32 {
        self.puzzle.difficulty
    }
}

impl SolverConfig for GateConfig {
    fn puzzle_compute_max_attempts(&self) -> u64 {
        self.puzzle.compute_max_attempts
    }
}

impl ListenerConfig for GateConfig {
    fn listen_address(&self) -> &str {
        &self.server.address
    }

    fn shutdown_timeout(&self) -> Duration {
        self.server.shutdown_timeout
    }

    fn connection_timeout(&self) -> Duration {
        self.server.connection_timeout
    }

    fn max_connections(&self) -> Option<usize> {
        self.server.max_connections
    }

    fn registry_clean_interval(&self) -> Duration {
        self.server.registry_clean_interval
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "127.0.0.1:9000")
    pub address: String,

    /// Read deadline for each accepted connection
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// How long shutdown waits for in-flight connections
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// How often expired puzzles are swept from the registry (0 disables)
    #[serde(with = "duration_serde")]
    pub registry_clean_interval: Duration,

    /// Maximum number of concurrent connections (unbounded when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            registry_clean_interval: DEFAULT_CLEAN_INTERVAL,
            max_connections: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:9000')",
                self.address
            ));
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == Some(0) {
            errors.push("Max connections must be greater than 0".to_string());
        }

        errors
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Target server address
    pub address: String,

    /// Timeout for establishing the connection
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Timeout for each server response
    #[serde(with = "duration_serde")]
    pub response_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:9000"),
            connection_timeout: Duration::from_secs(5),
            response_timeout: timeout::DEFAULT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        }

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        }

        if self.response_timeout.as_millis() < 100 {
            errors.push("Response timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Hashcash puzzle configuration shared by both sides
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PuzzleConfig {
    /// Leading hex zeros required in the header digest
    pub difficulty: u32,

    /// How long an issued puzzle can be redeemed
    #[serde(with = "duration_serde")]
    pub ttl: Duration,

    /// Counters the client tries before giving up
    pub compute_max_attempts: u64,
}

impl Default for PuzzleConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            ttl: DEFAULT_PUZZLE_TTL,
            compute_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl PuzzleConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.difficulty == 0 {
            errors.push("Puzzle difficulty must be greater than 0".to_string());
        } else if self.difficulty > MAX_DIFFICULTY {
            errors.push(format!(
                "Puzzle difficulty too large: {} (maximum: {MAX_DIFFICULTY})",
                self.difficulty
            ));
        }

        if self.ttl.as_secs() < 1 {
            errors.push("Puzzle TTL too short (minimum: 1s)".to_string());
        }

        if self.compute_max_attempts == 0 {
            errors.push("Compute max attempts must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        // Every level and format combination is usable
        Vec::new()
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("POW_GATE_SERVER_ADDRESS", "0.0.0.0:7000"),
            ("POW_GATE_DIFFICULTY", "6"),
            ("POW_GATE_PUZZLE_TTL_MS", "1500"),
            ("POW_GATE_MAX_CONNECTIONS", "64"),
        ]
        .into_iter()
        .collect();

        let mut config = GateConfig::default();
        config
            .apply_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.server.address, "0.0.0.0:7000");
        assert_eq!(config.client.address, "0.0.0.0:7000");
        assert_eq!(config.puzzle_difficulty(), 6);
        assert_eq!(config.puzzle_ttl(), Duration::from_millis(1500));
        assert_eq!(config.max_connections(), Some(64));
        assert_eq!(
            config.puzzle_compute_max_attempts(),
            DEFAULT_MAX_ATTEMPTS
        );
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = GateConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "POW_GATE_DIFFICULTY").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }
}
