//! Operator commands.
//!
//! Commands arrive as bare string literals (`FAN_ON`, `FAN_OFF`,
//! `FAN_AUTO`) and are stamped with their receipt time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Manual control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlCommand {
    #[serde(rename = "FAN_ON")]
    FanOn,
    #[serde(rename = "FAN_OFF")]
    FanOff,
    #[serde(rename = "FAN_AUTO")]
    FanAuto,
}

impl ControlCommand {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlCommand::FanOn => "FAN_ON",
            ControlCommand::FanOff => "FAN_OFF",
            ControlCommand::FanAuto => "FAN_AUTO",
        }
    }
}

impl std::fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlCommand {
    type Err = CommandParseError;

    /// Accepts the bare literal, optionally JSON-quoted, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let literal = s.trim().trim_matches('"').trim();

        match literal.to_ascii_uppercase().as_str() {
            "FAN_ON" => Ok(ControlCommand::FanOn),
            "FAN_OFF" => Ok(ControlCommand::FanOff),
            "FAN_AUTO" => Ok(ControlCommand::FanAuto),
            _ => Err(CommandParseError(literal.to_string())),
        }
    }
}

/// Unrecognised command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParseError(pub String);

impl std::fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Unknown command '{}' (expected FAN_ON, FAN_OFF or FAN_AUTO)",
            self.0
        )
    }
}

impl std::error::Error for CommandParseError {}

/// A command together with the time it was received.
///
/// `sequence` is the arrival position assigned by the receiving link and
/// only ever increases. `received_at` is wall-clock time and can step
/// backwards, so it feeds the fan clocks and payloads but never ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub command: ControlCommand,
    pub received_at: DateTime<Utc>,
    pub sequence: u64,
}

impl ReceivedCommand {
    pub fn new(command: ControlCommand, received_at: DateTime<Utc>, sequence: u64) -> Self {
        Self {
            command,
            received_at,
            sequence,
        }
    }
}

/// Parse an inbound message payload.
pub fn parse_payload(
    payload: &[u8],
    received_at: DateTime<Utc>,
    sequence: u64,
) -> Result<ReceivedCommand, CommandParseError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| CommandParseError(String::from_utf8_lossy(payload).into_owned()))?;
    let command = text.parse()?;
    Ok(ReceivedCommand::new(command, received_at, sequence))
}

/// Orders command batches by arrival and drops replayed commands.
///
/// Within a batch commands are applied in arrival order, so the last one
/// to arrive determines the final state. A command whose sequence is not
/// newer than one already applied is stale.
#[derive(Debug, Default)]
pub struct CommandSequencer {
    last_applied: Option<u64>,
}

impl CommandSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort a batch and split off stale commands.
    ///
    /// Returns the commands to apply, in order, and the number dropped.
    pub fn order(&mut self, mut batch: Vec<ReceivedCommand>) -> (Vec<ReceivedCommand>, usize) {
        batch.sort_by_key(|c| c.sequence);

        let total = batch.len();
        let fresh: Vec<ReceivedCommand> = batch
            .into_iter()
            .filter(|c| self.last_applied.map_or(true, |last| c.sequence > last))
            .collect();

        if let Some(newest) = fresh.last() {
            self.last_applied = Some(newest.sequence);
        }

        let stale = total - fresh.len();
        (fresh, stale)
    }
}
