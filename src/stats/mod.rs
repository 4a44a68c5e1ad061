//! Session statistics for the Garage Gas Bridge.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_stats, create_shared_stats_with_persistence, BridgeStats, SharedStats,
    StatsSnapshot,
};
