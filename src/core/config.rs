//! Configuration management for the delta relay
//!
//! Settings are read from `delta-relay.toml` when present and then
//! overridden from `DR_*` environment variables.

use crate::core::error::{Error, Result};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default configuration file name looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "delta-relay.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Processing cadence
    pub processor: ProcessorConfig,

    /// Message exchange
    pub amqp: AmqpConfig,

    /// Message encoding
    pub writer: WriterConfig,

    /// Metrics and monitoring
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Interval between processing passes
    #[serde(
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub interval: Duration,

    /// Optional JSON fixture used to seed the in-memory document store
    pub documents: Option<PathBuf>,
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmqpConfig {
    /// Exchange deltas are published to
    pub exchange: String,

    /// Capacity of the local exchange queue
    pub queue_capacity: usize,
}

/// Message writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Program identifier placed in every envelope
    pub program_id: String,

    /// Program version placed in every envelope
    pub program_version: String,

    /// Alternate schema file; the built-in V1 schema is used when unset
    pub schema_path: Option<PathBuf>,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics
    pub enable_prometheus: bool,

    /// Log the metrics exposition after every pass
    pub log_after_pass: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            documents: None,
        }
    }
}

impl Default for AmqpConfig {
    fn default() -> Self {
        Self {
            exchange: "quoteupdate".to_string(),
            queue_capacity: 1024,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            program_id: "quote_server".to_string(),
            program_version: env!("CARGO_PKG_VERSION").to_string(),
            schema_path: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
            log_after_pass: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default config file and environment variables
    pub fn load() -> Result<Self> {
        let mut config = match Self::from_file(DEFAULT_CONFIG_FILE) {
            Ok(file_config) => file_config,
            Err(Error::Io(_)) => Config::default(),
            Err(e) => return Err(e),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(exchange) = lookup("DR_EXCHANGE") {
            self.amqp.exchange = exchange;
        }

        if let Some(interval) = lookup("DR_PROCESS_INTERVAL") {
            self.processor.interval = parse_duration(&interval)
                .map_err(|e| Error::config(format!("Invalid process interval: {}", e)))?;
        }

        if let Some(documents) = lookup("DR_DOCUMENTS") {
            self.processor.documents = Some(PathBuf::from(documents));
        }

        if let Some(program_id) = lookup("DR_PROGRAM_ID") {
            self.writer.program_id = program_id;
        }

        if let Some(version) = lookup("DR_PROGRAM_VERSION") {
            self.writer.program_version = version;
        }

        if let Some(level) = lookup("DR_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("DR_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.amqp.exchange.trim().is_empty() {
            return Err(Error::config("Exchange name must not be empty"));
        }

        if self.amqp.queue_capacity == 0 {
            return Err(Error::config("Queue capacity must be at least 1"));
        }

        if self.processor.interval.is_zero() {
            return Err(Error::config("Process interval must be non-zero"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => return Err(Error::config("Invalid log format")),
        }

        Ok(())
    }
}

// Custom deserializer for Duration from string
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a duration string like '30s' or '5m'")
        }

        fn visit_str<E>(self, value: &str) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            parse_duration(value).map_err(E::custom)
        }

        fn visit_u64<E>(self, value: u64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(value))
        }

        fn visit_i64<E>(self, value: i64) -> std::result::Result<Duration, E>
        where
            E: de::Error,
        {
            u64::try_from(value)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}ms", duration.as_millis()))
}

/// Parse durations such as `500ms`, `30s`, `5m`, `1h` or raw seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "Invalid hours")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        let secs: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}
