//! Bounded, best-effort publishing.
//!
//! [`Publisher`] handles never block: a full queue drops the message. The
//! [`run_publisher`] task delivers queued messages to a [`MessageSink`],
//! retrying each a bounded number of times.

use super::payload::{AlertPayload, FanStatePayload, TelemetryPayload};
use super::{MessageSink, PublishError};
use crate::config::{PublishConfig, Topics};
use crate::core::{AnomalyVerdict, FanState};
use crate::sensor::GasReading;
use crate::shutdown::ShutdownSignal;
use crate::stats::SharedStats;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// A serialized message waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Clonable, non-blocking handle onto the outbound queue.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: mpsc::Sender<OutboundMessage>,
    topics: Arc<Topics>,
    tz: Tz,
    stats: SharedStats,
}

impl Publisher {
    /// Create a publisher and the receiving end for [`run_publisher`].
    pub fn new(
        capacity: usize,
        topics: Topics,
        tz: Tz,
        stats: SharedStats,
    ) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let publisher = Self {
            tx,
            topics: Arc::new(topics),
            tz,
            stats,
        };
        (publisher, rx)
    }

    /// Queue a telemetry message. Returns `false` if it was dropped.
    pub fn publish_telemetry(&self, reading: &GasReading, anomalous: bool, degraded: bool) -> bool {
        let payload = TelemetryPayload::new(reading, anomalous, degraded, self.tz);
        self.enqueue(&self.topics.telemetry, &payload, false)
    }

    /// Queue an alert for an anomalous verdict.
    pub fn publish_alert(&self, verdict: &AnomalyVerdict) -> bool {
        let payload = AlertPayload::new(verdict, self.tz);
        self.enqueue(&self.topics.alerts, &payload, false)
    }

    /// Queue the retained fan state.
    pub fn publish_fan_state(&self, state: FanState, at: DateTime<Utc>) -> bool {
        let payload = FanStatePayload::new(state, at, self.tz);
        self.enqueue(&self.topics.fan_state, &payload, true)
    }

    fn enqueue<T: Serialize>(&self, topic: &str, payload: &T, retain: bool) -> bool {
        let payload = match encode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic, error = %e, "Dropping message");
                self.stats.record_message_dropped();
                return false;
            }
        };

        let message = OutboundMessage {
            topic: topic.to_string(),
            payload,
            retain,
        };

        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                debug!(topic = %message.topic, "Outbound queue full, dropping message");
                self.stats.record_message_dropped();
                false
            }
            Err(TrySendError::Closed(message)) => {
                debug!(topic = %message.topic, "Outbound queue closed, dropping message");
                self.stats.record_message_dropped();
                false
            }
        }
    }
}

/// Encode a payload as JSON.
fn encode<T: Serialize>(payload: &T) -> Result<Vec<u8>, PublishError> {
    serde_json::to_vec(payload).map_err(|e| PublishError::Serialization(e.to_string()))
}

/// Delivery policy for queued messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Bound on a single attempt
    pub timeout: Duration,
    pub max_attempts: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl From<&PublishConfig> for PublishPolicy {
    fn from(config: &PublishConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self::from(&PublishConfig::default())
    }
}

/// Deliver queued messages until every [`Publisher`] handle is dropped.
///
/// Once shutdown is triggered each remaining message gets a single attempt.
pub async fn run_publisher(
    sink: Arc<dyn MessageSink>,
    mut rx: mpsc::Receiver<OutboundMessage>,
    policy: PublishPolicy,
    stats: SharedStats,
    shutdown: ShutdownSignal,
) {
    while let Some(message) = rx.recv().await {
        let attempts = if shutdown.is_triggered() {
            1
        } else {
            policy.max_attempts
        };

        match deliver(sink.as_ref(), &message, &policy, attempts).await {
            Ok(()) => stats.record_message_published(),
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "Dropping message after failed delivery");
                stats.record_message_dropped();
            }
        }
    }

    debug!("Publisher stopped");
}

async fn deliver(
    sink: &dyn MessageSink,
    message: &OutboundMessage,
    policy: &PublishPolicy,
    attempts: u32,
) -> Result<(), PublishError> {
    let mut last_error = PublishError::Closed;

    for attempt in 1..=attempts {
        let publish = sink.publish(&message.topic, message.payload.clone(), message.retain);
        match tokio::time::timeout(policy.timeout, publish).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => last_error = e,
            Err(_) => last_error = PublishError::Timeout,
        }

        if attempt < attempts {
            debug!(topic = %message.topic, attempt, error = %last_error, "Publish failed, retrying");
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    Err(last_error)
}
