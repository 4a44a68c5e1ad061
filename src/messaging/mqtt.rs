//! MQTT transport.
//!
//! [`MqttLink`] owns the connection event loop. It resubscribes to the
//! command topic after every (re)connect, forwards inbound commands into
//! the bounded command queue and backs off on connection errors. The
//! [`MqttSink`] it hands out publishes through the same connection.

use super::{MessageSink, PublishError};
use crate::config::MqttConfig;
use crate::core::{parse_payload, ReceivedCommand};
use crate::shutdown::ShutdownSignal;
use crate::stats::SharedStats;
use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Requests buffered between the client handle and the event loop.
const REQUEST_CAPACITY: usize = 64;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// How long to keep polling for the disconnect to go out on shutdown.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

fn options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.resolve_client_id(), &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options
}

/// [`MessageSink`] backed by an MQTT client handle.
#[derive(Clone)]
pub struct MqttSink {
    client: AsyncClient,
}

#[async_trait]
impl MessageSink for MqttSink {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

/// MQTT connection driver.
pub struct MqttLink {
    client: AsyncClient,
    eventloop: EventLoop,
    command_topic: String,
    backoff_max: Duration,
    next_sequence: u64,
}

impl MqttLink {
    pub fn new(config: &MqttConfig, command_topic: impl Into<String>) -> Self {
        let (client, eventloop) = AsyncClient::new(options(config), REQUEST_CAPACITY);

        Self {
            client,
            eventloop,
            command_topic: command_topic.into(),
            backoff_max: config.reconnect_backoff_max.max(INITIAL_BACKOFF),
            next_sequence: 0,
        }
    }

    /// A sink publishing through this connection.
    pub fn sink(&self) -> MqttSink {
        MqttSink {
            client: self.client.clone(),
        }
    }

    /// Poll the connection until shutdown.
    ///
    /// Connection errors never end the loop; the event loop reconnects on
    /// the next poll after a capped exponential backoff.
    pub async fn run(
        mut self,
        commands: mpsc::Sender<ReceivedCommand>,
        stats: SharedStats,
        mut shutdown: ShutdownSignal,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            let event = tokio::select! {
                _ = shutdown.wait() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %self.command_topic, "Connected to MQTT broker");
                    backoff = INITIAL_BACKOFF;
                    if let Err(e) = self
                        .client
                        .try_subscribe(self.command_topic.as_str(), QoS::AtLeastOnce)
                    {
                        warn!(error = %e, "Failed to subscribe to command topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic == self.command_topic {
                        self.forward_command(&publish.payload, &commands, &stats);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "MQTT connection error");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.backoff_max);
                }
            }
        }

        self.disconnect().await;
    }

    fn forward_command(
        &mut self,
        payload: &[u8],
        commands: &mpsc::Sender<ReceivedCommand>,
        stats: &SharedStats,
    ) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let command = match parse_payload(payload, Utc::now(), sequence) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed command");
                stats.record_rejected_commands(1);
                return;
            }
        };

        match commands.try_send(command) {
            Ok(()) => debug!(command = %command.command, "Command queued"),
            Err(TrySendError::Full(command)) => {
                warn!(command = %command.command, "Command queue full, dropping command");
                stats.record_rejected_commands(1);
            }
            Err(TrySendError::Closed(command)) => {
                debug!(command = %command.command, "Command flow stopped, dropping command");
                stats.record_rejected_commands(1);
            }
        }
    }

    /// Flush queued requests and send a disconnect, bounded by a grace period.
    async fn disconnect(&mut self) {
        if self.client.try_disconnect().is_err() {
            return;
        }

        let flush = async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };

        if tokio::time::timeout(DISCONNECT_GRACE, flush).await.is_err() {
            debug!("MQTT disconnect timed out");
        }
        info!("Disconnected from MQTT broker");
    }
}

/// Connect, publish a single message and wait for the broker to acknowledge it.
pub async fn publish_once(
    config: &MqttConfig,
    topic: &str,
    payload: Vec<u8>,
    timeout: Duration,
) -> Result<(), PublishError> {
    let (client, mut eventloop) = AsyncClient::new(options(config), REQUEST_CAPACITY);

    client
        .publish(topic, QoS::AtLeastOnce, false, payload)
        .await
        .map_err(|e| PublishError::Transport(e.to_string()))?;

    let acknowledged = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(PublishError::Transport(e.to_string())),
            }
        }
    };

    let result = tokio::time::timeout(timeout, acknowledged)
        .await
        .map_err(|_| PublishError::Timeout)?;

    if client.try_disconnect().is_ok() {
        let _ = tokio::time::timeout(Duration::from_millis(500), eventloop.poll()).await;
    }

    result
}
