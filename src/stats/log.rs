//! Bridge activity counters.
//!
//! Counts what the bridge did during a session: readings seen, decisions
//! taken, commands applied and messages published or dropped. Totals can be
//! persisted across restarts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current session.
#[derive(Debug)]
pub struct BridgeStats {
    /// Well-formed sensor readings
    readings: AtomicU64,
    /// Sensor lines that did not decode
    decode_errors: AtomicU64,
    /// Cycles without a usable peer baseline
    baseline_unavailable: AtomicU64,
    /// Readings judged anomalous
    anomalies: AtomicU64,
    /// Automatic fan toggles
    auto_transitions: AtomicU64,
    /// Operator commands applied
    manual_commands: AtomicU64,
    /// Operator commands dropped as out of order or malformed
    rejected_commands: AtomicU64,
    /// Failed actuator writes
    actuator_failures: AtomicU64,
    messages_published: AtomicU64,
    messages_dropped: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self {
            readings: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            baseline_unavailable: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            auto_transitions: AtomicU64::new(0),
            manual_commands: AtomicU64::new(0),
            rejected_commands: AtomicU64::new(0),
            actuator_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create counters backed by a file; existing totals are loaded.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!("Could not load previous bridge stats: {e}");
        }

        stats
    }

    pub fn record_reading(&self) {
        self.readings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_baseline_unavailable(&self) {
        self.baseline_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auto_transition(&self) {
        self.auto_transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_manual_command(&self) {
        self.manual_commands.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_commands(&self, count: u64) {
        self.rejected_commands.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_actuator_failure(&self) {
        self.actuator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            readings: self.readings.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            baseline_unavailable: self.baseline_unavailable.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            auto_transitions: self.auto_transitions.load(Ordering::Relaxed),
            manual_commands: self.manual_commands.load(Ordering::Relaxed),
            rejected_commands: self.rejected_commands.load(Ordering::Relaxed),
            actuator_failures: self.actuator_failures.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                totals: self.stats(),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                let t = persisted.totals;

                self.readings.store(t.readings, Ordering::Relaxed);
                self.decode_errors.store(t.decode_errors, Ordering::Relaxed);
                self.baseline_unavailable
                    .store(t.baseline_unavailable, Ordering::Relaxed);
                self.anomalies.store(t.anomalies, Ordering::Relaxed);
                self.auto_transitions
                    .store(t.auto_transitions, Ordering::Relaxed);
                self.manual_commands
                    .store(t.manual_commands, Ordering::Relaxed);
                self.rejected_commands
                    .store(t.rejected_commands, Ordering::Relaxed);
                self.actuator_failures
                    .store(t.actuator_failures, Ordering::Relaxed);
                self.messages_published
                    .store(t.messages_published, Ordering::Relaxed);
                self.messages_dropped
                    .store(t.messages_dropped, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Read persisted totals without creating live counters.
    pub fn read_persisted(path: &std::path::Path) -> Result<Option<StatsSnapshot>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;
        Ok(Some(persisted.totals))
    }

}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of bridge statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub readings: u64,
    pub decode_errors: u64,
    pub baseline_unavailable: u64,
    pub anomalies: u64,
    pub auto_transitions: u64,
    pub manual_commands: u64,
    pub rejected_commands: u64,
    pub actuator_failures: u64,
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

impl StatsSnapshot {
    pub fn summary(&self) -> String {
        format!(
            "Bridge Statistics:\n\
             - Readings processed: {}\n\
             - Malformed sensor lines: {}\n\
             - Cycles without peer baseline: {}\n\
             - Anomalies detected: {}\n\
             - Automatic fan toggles: {}\n\
             - Operator commands applied: {}\n\
             - Operator commands rejected: {}\n\
             - Actuator write failures: {}\n\
             - Messages published: {}\n\
             - Messages dropped: {}\n\
             - Session duration: {} seconds",
            self.readings,
            self.decode_errors,
            self.baseline_unavailable,
            self.anomalies,
            self.auto_transitions,
            self.manual_commands,
            self.rejected_commands,
            self.actuator_failures,
            self.messages_published,
            self.messages_dropped,
            self.session_duration_secs
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    totals: StatsSnapshot,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared bridge statistics.
pub type SharedStats = Arc<BridgeStats>;

pub fn create_shared_stats() -> SharedStats {
    Arc::new(BridgeStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedStats {
    Arc::new(BridgeStats::with_persistence(path))
}
