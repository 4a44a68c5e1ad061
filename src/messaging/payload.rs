//! JSON payloads published by the bridge.

use crate::core::{AnomalyVerdict, FanState};
use crate::sensor::GasReading;
use chrono::{DateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Render a timestamp as ISO-8601 in the configured timezone.
pub fn format_timestamp(at: DateTime<Utc>, tz: Tz) -> String {
    at.with_timezone(&tz)
        .to_rfc3339_opts(SecondsFormat::Millis, false)
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Published for every well-formed reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub gas: i64,
    pub timestamp: String,
    pub anomalous: bool,
    /// Set while the last actuator write failed
    #[serde(default, skip_serializing_if = "is_false")]
    pub degraded: bool,
}

impl TelemetryPayload {
    pub fn new(reading: &GasReading, anomalous: bool, degraded: bool, tz: Tz) -> Self {
        Self {
            gas: reading.value,
            timestamp: format_timestamp(reading.observed_at, tz),
            anomalous,
            degraded,
        }
    }
}

/// Published when a reading is anomalous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub gas: i64,
    pub baseline_mean: f64,
    pub timestamp: String,
}

impl AlertPayload {
    pub fn new(verdict: &AnomalyVerdict, tz: Tz) -> Self {
        Self {
            gas: verdict.local_value,
            baseline_mean: verdict.baseline.mean,
            timestamp: format_timestamp(verdict.decided_at, tz),
        }
    }
}

/// Retained fan intent, published whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanStatePayload {
    pub mode: String,
    pub on: bool,
    pub timestamp: String,
}

impl FanStatePayload {
    pub fn new(state: FanState, at: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            mode: state.mode().to_string(),
            on: state.actuator_on(),
            timestamp: format_timestamp(at, tz),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PeerStatistics;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_timestamp_uses_configured_timezone() {
        assert_eq!(format_timestamp(at(), Tz::UTC), "2024-01-15T12:00:00.000+00:00");
        assert_eq!(
            format_timestamp(at(), chrono_tz::Europe::Berlin),
            "2024-01-15T13:00:00.000+01:00"
        );
    }

    #[test]
    fn test_telemetry_omits_degraded_when_healthy() {
        let reading = GasReading::new(42, at());
        let json = serde_json::to_value(TelemetryPayload::new(&reading, false, false, Tz::UTC))
            .unwrap();

        assert_eq!(json["gas"], 42);
        assert_eq!(json["anomalous"], false);
        assert!(json.get("degraded").is_none());

        let json =
            serde_json::to_value(TelemetryPayload::new(&reading, true, true, Tz::UTC)).unwrap();
        assert_eq!(json["degraded"], true);
    }

    #[test]
    fn test_alert_carries_baseline_mean() {
        let verdict = AnomalyVerdict {
            is_anomalous: true,
            local_value: 300,
            baseline: PeerStatistics {
                mean: 100.0,
                stddev: None,
                sample_count: 3,
            },
            decided_at: at(),
        };
        let json = serde_json::to_value(AlertPayload::new(&verdict, Tz::UTC)).unwrap();

        assert_eq!(json["gas"], 300);
        assert_eq!(json["baseline_mean"], 100.0);
        assert_eq!(json["timestamp"], "2024-01-15T12:00:00.000+00:00");
    }

    #[test]
    fn test_fan_state_payload() {
        let payload = FanStatePayload::new(FanState::ManualOn, at(), Tz::UTC);
        assert_eq!(payload.mode, "manual");
        assert!(payload.on);

        let payload = FanStatePayload::new(FanState::INITIAL, at(), Tz::UTC);
        assert_eq!(payload.mode, "auto");
        assert!(!payload.on);
    }
}
