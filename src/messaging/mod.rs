//! Outbound telemetry and inbound operator commands.
//!
//! The core never talks to a broker directly. It hands serialized payloads
//! to a [`Publisher`], whose background task delivers them to a
//! [`MessageSink`] with a bounded retry policy.

pub mod payload;
pub mod publisher;

#[cfg(feature = "mqtt")]
pub mod mqtt;

use async_trait::async_trait;

// Re-export commonly used types
pub use payload::{format_timestamp, AlertPayload, FanStatePayload, TelemetryPayload};
pub use publisher::{run_publisher, OutboundMessage, PublishPolicy, Publisher};

#[cfg(feature = "mqtt")]
pub use mqtt::{publish_once, MqttLink, MqttSink};

/// Destination for outbound messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish one message.
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError>;
}

/// Publishing errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    Serialization(String),
    Transport(String),
    Timeout,
    Closed,
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Serialization(e) => write!(f, "Serialization error: {e}"),
            PublishError::Transport(e) => write!(f, "Transport error: {e}"),
            PublishError::Timeout => write!(f, "Publish timed out"),
            PublishError::Closed => write!(f, "Publish queue is closed"),
        }
    }
}

impl std::error::Error for PublishError {}
