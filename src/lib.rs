//! Garage Gas Bridge - gas sensor gateway with peer-relative anomaly detection.
//!
//! This library bridges a gas sensor attached over a serial link to an MQTT
//! coordination layer. Each reading is compared with what the other garages
//! report; an abnormally high reading switches the ventilation fan on, and
//! operators can override the fan at any time.
//!
//! # Guarantees
//!
//! - **Manual priority**: an operator command pins the fan until `FAN_AUTO`
//! - **Hysteresis**: automatic toggles are separated by at least the cooldown
//! - **Never blocks on the network**: telemetry is queued and dropped when full
//! - **Nothing is fatal**: bad lines, missing peers and failed writes are counted and skipped
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        Garage Gas Bridge                         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐   │
//! │  │  Serial  │──▶│ Baseline │──▶│ Anomaly  │──▶│     Fan      │   │
//! │  │  reader  │   │  (peers) │   │ detector │   │  controller  │   │
//! │  └──────────┘   └──────────┘   └──────────┘   └──────────────┘   │
//! │                                                 ▲     │          │
//! │  ┌──────────┐   ┌──────────┐                    │     ▼          │
//! │  │   MQTT   │──▶│ Commands │────────────────────┘  ┌──────────┐  │
//! │  │   link   │   │ (queue)  │                       │ Actuator │  │
//! │  └──────────┘   └──────────┘                       └──────────┘  │
//! │       ▲                                                          │
//! │       └──────────────── Publisher (bounded queue) ◀──────────────│
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use garage_gas_bridge::core::{compute_baseline, AnomalyDetector};
//!
//! let baseline = compute_baseline(&[90.0, 100.0, 110.0]);
//! let verdict = AnomalyDetector::default().check(300, &baseline, Utc::now());
//! assert!(verdict.is_anomalous);
//! ```

pub mod actuator;
pub mod bridge;
pub mod config;
pub mod core;
pub mod dataset;
pub mod messaging;
pub mod sensor;
pub mod shutdown;
pub mod stats;

// Re-export key types at crate root for convenience
pub use actuator::{Actuator, ActuatorDriver, ActuatorError};
pub use bridge::{Bridge, BridgeIo, CommandLoop, CycleReport, SensorLoop};
pub use config::{Config, ConfigError, DatasetConfig, Topics};
pub use crate::core::{
    AnomalyDetector, AnomalyVerdict, ControlCommand, FanController, FanState, PeerStatistics,
    ReceivedCommand,
};
pub use dataset::{DatasetError, PeerDataset};
pub use messaging::{MessageSink, PublishError, Publisher};
pub use sensor::{GasReading, SensorError, SensorFrame};
pub use shutdown::{shutdown_channel, ShutdownSignal, ShutdownTrigger};
pub use stats::{BridgeStats, SharedStats, StatsSnapshot};

#[cfg(feature = "mqtt")]
pub use messaging::{MqttLink, MqttSink};

#[cfg(feature = "serial")]
pub use sensor::{SerialActuator, SerialSensorLink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
