//! Configuration structures for the ramp driver.
//!
//! Supports TOML deserialization with defaults that reproduce the
//! classic `filter_limit_max` expansion: 4 s warm-up, 10 Hz, real-time pacing.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default logical name of the configuration service.
pub const DEFAULT_SERVICE: &str = "filter";

/// Default remote field driven by the ramp.
pub const DEFAULT_FIELD: &str = "filter_limit_max";

/// Top-level ramp configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Logical name of the configuration service to update.
    pub service: String,

    /// Remote configuration field that receives the ramp value.
    pub field: String,

    /// Unconditional pause between connecting and the first update.
    #[serde(with = "humantime_serde")]
    pub warmup: Duration,

    /// Target update rate in Hz.
    pub rate_hz: f64,

    /// Multiplier applied to elapsed seconds before sending.
    pub speedup_factor: f64,

    /// Stop after this many updates (0 = run until shutdown).
    pub max_updates: u64,

    /// What to do when the service rejects a write mid-ramp.
    pub on_update_failure: UpdateFailurePolicy,

    /// Time source for the ramp.
    pub clock: ClockSource,

    /// Configuration service client settings.
    pub client: ClientConfig,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            field: DEFAULT_FIELD.to_string(),
            warmup: Duration::from_secs(4),
            rate_hz: 10.0,
            speedup_factor: 1.0,
            max_updates: 0,
            on_update_failure: UpdateFailurePolicy::default(),
            clock: ClockSource::default(),
            client: ClientConfig::default(),
        }
    }
}

/// Policy for a write the service rejected after the ramp has started.
///
/// Lost connections are always fatal regardless of this policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UpdateFailurePolicy {
    /// Abort the ramp and exit with an error.
    #[default]
    Fatal,
    /// Log a warning and carry on with the next tick.
    Skip,
}

/// Time source used to compute elapsed values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// Monotonic process clock; never goes backwards.
    #[default]
    Monotonic,
    /// System wall clock; follows NTP and manual adjustments.
    Wall,
}

/// Configuration service client settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Client driver type.
    pub driver: ClientDriver,

    /// TCP client configuration.
    pub tcp: TcpClientConfig,
}

/// Supported client drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientDriver {
    /// In-memory service, for dry runs and testing.
    #[default]
    Simulated,
    /// JSON lines over TCP.
    Tcp,
}

/// TCP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpClientConfig {
    /// Server address (host:port).
    pub address: String,

    /// Connection timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Read/write timeout for a single request.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for TcpClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:11411"),
            connect_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(1),
        }
    }
}

impl RampConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values that serde cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::Invalid("service name must not be empty".into()));
        }
        if self.field.trim().is_empty() {
            return Err(ConfigError::Invalid("field name must not be empty".into()));
        }
        if !self.rate_hz.is_finite() || self.rate_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rate_hz must be a positive number, got {}",
                self.rate_hz
            )));
        }
        if period_from_rate(self.rate_hz).is_none() {
            return Err(ConfigError::Invalid(format!(
                "rate_hz {} has no representable tick period",
                self.rate_hz
            )));
        }
        if !self.speedup_factor.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "speedup_factor must be finite, got {}",
                self.speedup_factor
            )));
        }
        if self.client.driver == ClientDriver::Tcp && self.client.tcp.address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "tcp driver selected but client.tcp.address is empty".into(),
            ));
        }
        Ok(())
    }

    /// Tick period derived from `rate_hz`.
    ///
    /// Zero if `rate_hz` would fail [`validate`](Self::validate).
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        period_from_rate(self.rate_hz).unwrap_or(Duration::ZERO)
    }
}

/// Tick period for `rate_hz`.
///
/// `None` unless the rate is finite, positive, and its period is a
/// non-zero [`Duration`].
#[must_use]
pub fn period_from_rate(rate_hz: f64) -> Option<Duration> {
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
