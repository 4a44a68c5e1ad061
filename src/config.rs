//! Configuration for the Garage Gas Bridge.
//!
//! The configuration is a JSON document loaded once at startup. After
//! validation it is treated as immutable and each component receives the
//! slice it needs.

use crate::core::DetectionRule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder substituted into topic templates.
pub const GARAGE_ID_PLACEHOLDER: &str = "{garage_id}";

/// Main configuration for the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Identifier of this garage, used in topic names
    pub garage_id: String,

    /// Serial link to the sensor board
    pub serial: SerialConfig,

    /// MQTT broker connection
    pub mqtt: MqttConfig,

    /// Topic templates
    pub topics: TopicTemplates,

    /// Anomaly detection parameters
    pub detection: DetectionConfig,

    /// Minimum time between two automatic fan transitions
    #[serde(with = "duration_serde")]
    pub cooldown: Duration,

    /// Where peer ("other garage") readings come from
    pub dataset: DatasetConfig,

    /// IANA timezone used to render payload timestamps
    pub timezone: String,

    /// Capacity of the inbound command queue
    pub command_queue_capacity: usize,

    /// Outbound publishing policy
    pub publish: PublishConfig,

    /// Path for run statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("garage-gas-bridge");

        Self {
            garage_id: "G1".to_string(),
            serial: SerialConfig::default(),
            mqtt: MqttConfig::default(),
            topics: TopicTemplates::default(),
            detection: DetectionConfig::default(),
            cooldown: Duration::from_secs(5),
            dataset: DatasetConfig::default(),
            timezone: "UTC".to_string(),
            command_queue_capacity: 32,
            publish: PublishConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, config_path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("garage-gas-bridge")
            .join("config.json")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check the configuration for values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.garage_id.trim().is_empty() {
            return Err(ConfigError::Invalid("garage_id must not be empty".to_string()));
        }
        if !self.detection.factor.is_finite() || self.detection.factor <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "detection.factor must be a positive number, got {}",
                self.detection.factor
            )));
        }
        if let DetectionRule::ZScore { threshold } = self.detection.rule {
            if !threshold.is_finite() {
                return Err(ConfigError::Invalid(
                    "detection z_score threshold must be finite".to_string(),
                ));
            }
        }
        if chrono::Duration::from_std(self.cooldown).is_err() {
            return Err(ConfigError::Invalid("cooldown is out of range".to_string()));
        }
        if self.command_queue_capacity == 0 || self.publish.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue capacities must be at least 1".to_string(),
            ));
        }
        if self.publish.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "publish.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.mqtt.keep_alive < Duration::from_secs(5) {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive must be at least 5 seconds".to_string(),
            ));
        }
        if let DatasetConfig::Simulated { garages: 0, .. } = self.dataset {
            return Err(ConfigError::Invalid(
                "simulated dataset needs at least one garage".to_string(),
            ));
        }
        self.tz()?;
        Ok(())
    }

    /// Parse the configured timezone.
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    /// Resolve topic templates for this garage.
    pub fn topics(&self) -> Topics {
        let resolve = |template: &str| template.replace(GARAGE_ID_PLACEHOLDER, &self.garage_id);

        Topics {
            telemetry: resolve(&self.topics.telemetry),
            alerts: resolve(&self.topics.alerts),
            commands: resolve(&self.topics.commands),
            fan_state: resolve(&self.topics.fan_state),
        }
    }

    /// Path of the persisted run statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }
}

/// Serial link settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Read timeout; bounds how long the reader takes to notice a stop request
    #[serde(with = "duration_serde")]
    pub read_timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let port = if cfg!(target_os = "windows") {
            "COM6"
        } else {
            "/dev/ttyUSB0"
        };

        Self {
            port: port.to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// MQTT broker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Client id; generated from the hostname when absent
    pub client_id: Option<String>,
    #[serde(with = "duration_serde")]
    pub keep_alive: Duration,
    /// Upper bound of the reconnect backoff
    #[serde(with = "duration_serde")]
    pub reconnect_backoff_max: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            keep_alive: Duration::from_secs(30),
            reconnect_backoff_max: Duration::from_secs(30),
        }
    }
}

impl MqttConfig {
    /// Client id to connect with.
    pub fn resolve_client_id(&self) -> String {
        if let Some(id) = &self.client_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        format!(
            "gas-bridge-{}-{}",
            hostname,
            &uuid::Uuid::new_v4().to_string()[..8]
        )
    }
}

/// Topic templates; `{garage_id}` is replaced at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicTemplates {
    pub telemetry: String,
    pub alerts: String,
    pub commands: String,
    pub fan_state: String,
}

impl Default for TopicTemplates {
    fn default() -> Self {
        Self {
            telemetry: "garages/{garage_id}/telemetry".to_string(),
            alerts: "garages/{garage_id}/alerts".to_string(),
            commands: "garages/{garage_id}/cmd".to_string(),
            fan_state: "garages/{garage_id}/fan".to_string(),
        }
    }
}

/// Resolved topic names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub telemetry: String,
    pub alerts: String,
    pub commands: String,
    pub fan_state: String,
}

/// Anomaly detection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Local reading is anomalous above `peer mean * factor`
    pub factor: f64,
    pub rule: DetectionRule,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            factor: 1.5,
            rule: DetectionRule::MeanRatio,
        }
    }
}

/// Source of peer readings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DatasetConfig {
    /// Deterministic oscillating values around a base level
    Simulated {
        base: f64,
        spread: f64,
        garages: usize,
    },
    /// Rows of peer readings replayed from a CSV file
    Csv { path: PathBuf },
    /// Constant peer readings
    Fixed { values: Vec<f64> },
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig::Simulated {
            base: 100.0,
            spread: 20.0,
            garages: 4,
        }
    }
}

/// Outbound publishing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Messages buffered before new ones are dropped
    pub queue_capacity: usize,
    /// Bound on a single publish attempt
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            timeout: Duration::from_secs(2),
            max_attempts: 3,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration (whole seconds).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
