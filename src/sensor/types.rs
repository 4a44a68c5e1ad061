//! Gas reading types produced by the sensor link.
//!
//! The sensor board prints one line per sample in the form `MQ2:<value>`.
//! Anything else on the line is treated as a malformed frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Line prefix printed by the firmware before each MQ-2 sample.
pub const MQ2_PREFIX: &str = "MQ2:";

/// A single decoded gas sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GasReading {
    /// Raw sensor units as reported by the board
    pub value: i64,
    /// When the gateway decoded the sample
    pub observed_at: DateTime<Utc>,
}

impl GasReading {
    pub fn new(value: i64, observed_at: DateTime<Utc>) -> Self {
        Self { value, observed_at }
    }
}

/// One unit of output from the sensor link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorFrame {
    /// A successfully decoded sample
    Reading(GasReading),
    /// A line that could not be decoded (kept for diagnostics)
    Malformed(String),
}

impl SensorFrame {
    /// The decoded reading, if any.
    pub fn reading(&self) -> Option<&GasReading> {
        match self {
            SensorFrame::Reading(r) => Some(r),
            SensorFrame::Malformed(_) => None,
        }
    }
}

/// Decode a single firmware line.
pub fn decode_line(line: &str, now: DateTime<Utc>) -> SensorFrame {
    let trimmed = line.trim();

    match trimmed
        .strip_prefix(MQ2_PREFIX)
        .map(|value| value.trim().parse::<i64>())
    {
        Some(Ok(value)) => SensorFrame::Reading(GasReading::new(value, now)),
        _ => SensorFrame::Malformed(trimmed.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_line() {
        let now = Utc::now();
        let frame = decode_line("MQ2:412\r\n", now);
        assert_eq!(frame, SensorFrame::Reading(GasReading::new(412, now)));
    }

    #[test]
    fn test_decode_tolerates_inner_whitespace() {
        let frame = decode_line("  MQ2: 87 ", Utc::now());
        assert_eq!(frame.reading().map(|r| r.value), Some(87));
    }

    #[test]
    fn test_decode_rejects_unknown_prefix() {
        let frame = decode_line("DHT:21", Utc::now());
        assert_eq!(frame, SensorFrame::Malformed("DHT:21".to_string()));
    }

    #[test]
    fn test_decode_rejects_non_integer() {
        assert!(decode_line("MQ2:12.5", Utc::now()).reading().is_none());
        assert!(decode_line("MQ2:", Utc::now()).reading().is_none());
        assert!(decode_line("MQ2:abc", Utc::now()).reading().is_none());
    }
}
