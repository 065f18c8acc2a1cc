pub mod loader;
pub mod models;

pub use loader::LoadStats;
pub use models::{EquipmentType, Reading, Series, StationId, StationSummary, Variable};

use crate::error::{AppError, Result};
use crate::stations::{Station, StationIndex};
use chrono::{DateTime, Utc};
use loader::Loader;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Immutable in-memory view of the station CSV.
#[derive(Debug, Clone)]
pub struct Dataset {
    source: String,
    stations: StationIndex,
    variables: Vec<Variable>,
    bounds: Option<TimeBounds>,
    stats: LoadStats,
}

impl Dataset {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            AppError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open dataset '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_reader(BufReader::new(file), &path.display().to_string())
    }

    pub fn from_reader<R: Read>(reader: R, source: &str) -> Result<Self> {
        info!("Loading station data from {}", source);

        let (stations, variables, stats) = Loader::read(reader)?;
        let dataset = Self::from_stations(source, stations, variables, stats);

        info!(
            "Loaded {}: {} rows, {} readings, {} stations, {} duplicates merged, {} invalid values",
            source,
            dataset.stats.total_rows,
            dataset.stats.readings,
            dataset.stats.stations,
            dataset.stats.merged_duplicates,
            dataset.stats.invalid_values
        );

        Ok(dataset)
    }

    fn from_stations(
        source: &str,
        stations: Vec<Station>,
        variables: Vec<Variable>,
        stats: LoadStats,
    ) -> Self {
        let start = stations
            .iter()
            .filter_map(|s| s.readings().first())
            .map(|r| r.timestamp)
            .min();
        let end = stations
            .iter()
            .filter_map(|s| s.readings().last())
            .map(|r| r.timestamp)
            .max();
        let bounds = start.zip(end).map(|(start, end)| TimeBounds { start, end });

        Self {
            source: source.to_string(),
            stations: StationIndex::new(stations),
            variables,
            bounds,
            stats,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stations(&self) -> &StationIndex {
        &self.stations
    }

    /// Variables with a column in the source, in canonical order
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn has_variable(&self, variable: Variable) -> bool {
        self.variables.contains(&variable)
    }

    /// `None` when the dataset holds no readings
    pub fn bounds(&self) -> Option<TimeBounds> {
        self.bounds
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }
}

/// Shared, swappable reference to the current dataset.
///
/// Readers take a cheap `Arc` clone and keep using it even if a reload
/// swaps in a new dataset meanwhile.
#[derive(Debug, Clone)]
pub struct DatasetHandle {
    inner: Arc<RwLock<Arc<Dataset>>>,
}

impl DatasetHandle {
    pub fn new(dataset: Dataset) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(dataset))),
        }
    }

    pub fn current(&self) -> Arc<Dataset> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Install a new dataset, returning the previous one
    pub fn replace(&self, dataset: Dataset) -> Arc<Dataset> {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *guard, Arc::new(dataset))
    }
}
