//! Decision core for the Garage Gas Bridge.
//!
//! This module contains:
//! - Peer baseline statistics
//! - The anomaly decision rule
//! - The fan state machine shared by the sensor and command flows
//! - Operator command parsing and ordering

pub mod anomaly;
pub mod baseline;
pub mod command;
pub mod fan;

// Re-export commonly used types
pub use anomaly::{check, AnomalyDetector, AnomalyVerdict, DetectionRule};
pub use baseline::{compute_baseline, PeerStatistics};
pub use command::{
    parse_payload, CommandParseError, CommandSequencer, ControlCommand, ReceivedCommand,
};
pub use fan::{ActuatorSignal, AutoOutcome, FanController, FanState, ManualOutcome};
