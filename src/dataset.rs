//! Peer ("other garage") readings.
//!
//! A [`PeerDataset`] returns the current snapshot of peer readings on each
//! sensor cycle. The snapshot may be empty.

use crate::config::DatasetConfig;
use std::path::{Path, PathBuf};

/// Source of peer readings.
pub trait PeerDataset: Send + Sync {
    /// Current peer readings, one per garage.
    fn current_values(&mut self) -> Vec<f64>;
}

/// Constant peer readings.
#[derive(Debug, Clone, Default)]
pub struct FixedDataset {
    values: Vec<f64>,
}

impl FixedDataset {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
}

impl PeerDataset for FixedDataset {
    fn current_values(&mut self) -> Vec<f64> {
        self.values.clone()
    }
}

/// Peer readings replayed row by row from CSV content.
///
/// Each row is one tick; rows cycle once exhausted. Lines starting with `#`
/// and rows without any numeric cell (such as a header) are skipped.
#[derive(Debug, Clone)]
pub struct CsvDataset {
    rows: Vec<Vec<f64>>,
    cursor: usize,
}

impl CsvDataset {
    /// Parse CSV content.
    pub fn parse(content: &str) -> Self {
        let rows = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                line.split(',')
                    .filter_map(|cell| cell.trim().parse::<f64>().ok())
                    .filter(|v| v.is_finite())
                    .collect::<Vec<f64>>()
            })
            .filter(|row| !row.is_empty())
            .collect();

        Self { rows, cursor: 0 }
    }

    /// Load a CSV file; fails if it has no numeric rows.
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DatasetError::Io(format!("{}: {e}", path.display())))?;
        let dataset = Self::parse(&content);

        if dataset.rows.is_empty() {
            return Err(DatasetError::Empty(path.to_path_buf()));
        }

        Ok(dataset)
    }

    /// Number of rows available.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

impl PeerDataset for CsvDataset {
    fn current_values(&mut self) -> Vec<f64> {
        if self.rows.is_empty() {
            return Vec::new();
        }

        let row = self.rows[self.cursor % self.rows.len()].clone();
        self.cursor = (self.cursor + 1) % self.rows.len();
        row
    }
}

/// Deterministic simulated garages oscillating around a base level.
#[derive(Debug, Clone)]
pub struct SimulatedDataset {
    base: f64,
    spread: f64,
    garages: usize,
    tick: u64,
}

impl SimulatedDataset {
    pub fn new(base: f64, spread: f64, garages: usize) -> Self {
        Self {
            base,
            spread,
            garages,
            tick: 0,
        }
    }
}

impl PeerDataset for SimulatedDataset {
    fn current_values(&mut self) -> Vec<f64> {
        let t = self.tick as f64;
        self.tick = self.tick.wrapping_add(1);

        (0..self.garages)
            .map(|g| (self.base + self.spread * (t * 0.3 + g as f64).sin()).max(0.0))
            .collect()
    }
}

/// Build the dataset described by the configuration.
pub fn from_config(config: &DatasetConfig) -> Result<Box<dyn PeerDataset>, DatasetError> {
    Ok(match config {
        DatasetConfig::Simulated {
            base,
            spread,
            garages,
        } => Box::new(SimulatedDataset::new(*base, *spread, *garages)),
        DatasetConfig::Csv { path } => Box::new(CsvDataset::load(path)?),
        DatasetConfig::Fixed { values } => Box::new(FixedDataset::new(values.clone())),
    })
}

/// Dataset errors.
#[derive(Debug)]
pub enum DatasetError {
    Io(String),
    Empty(PathBuf),
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatasetError::Io(e) => write!(f, "Dataset IO error: {e}"),
            DatasetError::Empty(path) => write!(f, "Dataset {path:?} has no numeric rows"),
        }
    }
}

impl std::error::Error for DatasetError {}
