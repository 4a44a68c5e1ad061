//! Peer baseline statistics.
//!
//! The baseline for one cycle is the mean (and, with two or more peers, the
//! sample standard deviation) of the readings reported by the other garages.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Statistics over one snapshot of peer readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeerStatistics {
    /// Arithmetic mean; NaN when no peers reported
    pub mean: f64,
    /// Sample standard deviation; present only with at least two peers
    pub stddev: Option<f64>,
    /// Number of peer readings the statistics were computed from
    pub sample_count: usize,
}

impl PeerStatistics {
    /// Baseline used when no peer readings are available.
    pub fn unavailable() -> Self {
        Self {
            mean: f64::NAN,
            stddev: None,
            sample_count: 0,
        }
    }

    /// Whether the baseline can be compared against.
    pub fn is_available(&self) -> bool {
        self.sample_count > 0
    }
}

/// Compute peer statistics from the current snapshot.
///
/// Non-finite values are ignored.
pub fn compute_baseline(peer_values: &[f64]) -> PeerStatistics {
    let values: Vec<f64> = peer_values.iter().copied().filter(|v| v.is_finite()).collect();

    if values.is_empty() {
        return PeerStatistics::unavailable();
    }

    let stddev = if values.len() >= 2 {
        Some(values.iter().std_dev())
    } else {
        None
    };

    PeerStatistics {
        mean: values.iter().mean(),
        stddev,
        sample_count: values.len(),
    }
}
