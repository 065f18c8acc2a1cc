//! Station index: static metadata plus read-only access to each station's readings.

use crate::dataset::models::{EquipmentType, Reading, Series, StationId, StationSummary, Variable};
use crate::error::{AppError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Station {
    summary: StationSummary,
    equipment_types: Vec<EquipmentType>,
    readings: Vec<Reading>,
    series: Vec<Series>,
}

impl Station {
    /// `readings` must already be sorted with strictly increasing timestamps.
    pub(crate) fn new(
        summary: StationSummary,
        equipment_types: Vec<EquipmentType>,
        readings: Vec<Reading>,
    ) -> Self {
        let mut series = vec![Series::default(); Variable::COUNT];
        for reading in &readings {
            for variable in Variable::ALL {
                if let Some(value) = reading.value(variable) {
                    let column = &mut series[variable.index()];
                    column.times.push(reading.timestamp);
                    column.values.push(value);
                }
            }
        }

        Self {
            summary,
            equipment_types,
            readings,
            series,
        }
    }

    pub fn id(&self) -> StationId {
        self.summary.station_id
    }

    pub fn summary(&self) -> &StationSummary {
        &self.summary
    }

    /// Every equipment type seen for this station id
    pub fn equipment_types(&self) -> &[EquipmentType] {
        &self.equipment_types
    }

    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Defined values of one variable
    pub fn series(&self, variable: Variable) -> &Series {
        &self.series[variable.index()]
    }
}

#[derive(Debug, Clone, Default)]
pub struct StationIndex {
    stations: Vec<Station>,
    by_id: HashMap<StationId, usize>,
}

impl StationIndex {
    pub fn new(mut stations: Vec<Station>) -> Self {
        stations.sort_by_key(|s| s.id());
        let by_id = stations
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id(), i))
            .collect();
        Self { stations, by_id }
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Stations in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.iter()
    }

    pub fn stations(&self) -> Vec<StationSummary> {
        self.stations.iter().map(|s| s.summary.clone()).collect()
    }

    pub fn get(&self, id: StationId) -> Option<&Station> {
        self.by_id.get(&id).map(|&i| &self.stations[i])
    }

    pub fn station(&self, id: StationId) -> Result<&Station> {
        self.get(id).ok_or(AppError::StationNotFound(id))
    }

    /// Stations with an AirLink (`AIR`) device and no `VUE+AIR` rows
    pub fn airlink_stations(&self) -> Vec<StationSummary> {
        self.stations
            .iter()
            .filter(|s| {
                s.equipment_types.contains(&EquipmentType::Air)
                    && !s.equipment_types.contains(&EquipmentType::VueAir)
            })
            .map(|s| s.summary.clone())
            .collect()
    }
}
