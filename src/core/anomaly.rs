//! Anomaly decision rule.
//!
//! The default rule compares the local reading with the peer mean scaled by
//! a factor. A z-score rule can be configured instead; it needs a standard
//! deviation and falls back to the mean-ratio rule when none is usable.

use super::baseline::PeerStatistics;
use crate::config::DetectionConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which comparison decides an anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionRule {
    /// `local > mean * factor`
    MeanRatio,
    /// `(local - mean) / stddev > threshold`
    ZScore { threshold: f64 },
}

/// Result of one anomaly evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomalous: bool,
    pub local_value: i64,
    pub baseline: PeerStatistics,
    pub decided_at: DateTime<Utc>,
}

/// Mean-ratio rule: anomalous iff a baseline exists and `local > mean * factor`.
pub fn check(
    local_value: i64,
    baseline: &PeerStatistics,
    factor: f64,
    decided_at: DateTime<Utc>,
) -> AnomalyVerdict {
    AnomalyVerdict {
        is_anomalous: exceeds_mean_ratio(local_value, baseline, factor),
        local_value,
        baseline: *baseline,
        decided_at,
    }
}

fn exceeds_mean_ratio(local_value: i64, baseline: &PeerStatistics, factor: f64) -> bool {
    baseline.is_available() && (local_value as f64) > baseline.mean * factor
}

/// Configured anomaly detector.
#[derive(Debug, Clone, Copy)]
pub struct AnomalyDetector {
    factor: f64,
    rule: DetectionRule,
}

impl AnomalyDetector {
    pub fn new(factor: f64, rule: DetectionRule) -> Self {
        Self { factor, rule }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(config.factor, config.rule)
    }

    /// Mean-ratio factor.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Evaluate a local reading against the peer baseline.
    pub fn check(
        &self,
        local_value: i64,
        baseline: &PeerStatistics,
        decided_at: DateTime<Utc>,
    ) -> AnomalyVerdict {
        let is_anomalous = match self.rule {
            DetectionRule::MeanRatio => exceeds_mean_ratio(local_value, baseline, self.factor),
            DetectionRule::ZScore { threshold } => match baseline.stddev {
                Some(sd) if baseline.is_available() && sd.is_finite() && sd > 0.0 => {
                    (local_value as f64 - baseline.mean) / sd > threshold
                }
                _ => exceeds_mean_ratio(local_value, baseline, self.factor),
            },
        };

        AnomalyVerdict {
            is_anomalous,
            local_value,
            baseline: *baseline,
            decided_at,
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(1.5, DetectionRule::MeanRatio)
    }
}
