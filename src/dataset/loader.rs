use crate::dataset::models::{EquipmentType, Reading, StationId, StationSummary, Variable};
use crate::error::{AppError, Result};
use crate::stations::Station;
use crate::time::parse_timestamp;
use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, warn};

/// Cell contents treated as "no value"
const MISSING_TOKENS: &[&str] = &["", "na", "nan", "null", "none", "n/a"];

const REQUIRED_COLUMNS: &[&str] = &["station_id", "timestamp", "lat", "lon"];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadStats {
    pub total_rows: usize,
    pub readings: usize,
    pub merged_duplicates: usize,
    pub invalid_values: usize,
    pub stations: usize,
}

/// Header positions, resolved once per file
#[derive(Debug, Clone)]
struct ColumnMapping {
    station_id: usize,
    timestamp: usize,
    lat: usize,
    lon: usize,
    station_name: Option<usize>,
    equipment: Option<usize>,
    variables: Vec<(Variable, usize)>,
}

impl ColumnMapping {
    fn analyze(headers: &StringRecord) -> Result<Self> {
        let name_to_index: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase(), i))
            .collect();

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !name_to_index.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(AppError::Schema(format!(
                "Missing required column{}: {}",
                if missing.len() > 1 { "s" } else { "" },
                missing.join(", ")
            )));
        }

        let variables: Vec<(Variable, usize)> = Variable::ALL
            .into_iter()
            .filter_map(|v| name_to_index.get(v.column()).map(|&i| (v, i)))
            .collect();
        if variables.is_empty() {
            return Err(AppError::Schema(format!(
                "No variable columns found, expected at least one of: {}",
                Variable::ALL.map(|v| v.column()).join(", ")
            )));
        }

        Ok(Self {
            station_id: name_to_index["station_id"],
            timestamp: name_to_index["timestamp"],
            lat: name_to_index["lat"],
            lon: name_to_index["lon"],
            station_name: name_to_index.get("station_name").copied(),
            equipment: name_to_index.get("tipo_equipo").copied(),
            variables,
        })
    }
}

enum Cell {
    Missing,
    Value(f64),
    Invalid,
}

fn parse_cell(raw: Option<&str>) -> Cell {
    let Some(raw) = raw.map(str::trim) else {
        return Cell::Missing;
    };
    if MISSING_TOKENS.contains(&raw.to_ascii_lowercase().as_str()) {
        return Cell::Missing;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Cell::Value(v),
        _ => Cell::Invalid,
    }
}

fn parse_station_id(raw: &str) -> Option<StationId> {
    let raw = raw.trim();
    if let Ok(id) = raw.parse::<StationId>() {
        return Some(id);
    }
    // pandas writes integer ids as floats when the column has gaps
    let f = raw.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as StationId)
    } else {
        None
    }
}

/// Lowest rank wins: (equipment priority, row order)
type Rank = (u8, usize);

#[derive(Debug)]
struct Ranked<T> {
    rank: Rank,
    value: T,
}

fn offer<T>(slot: &mut Option<Ranked<T>>, rank: Rank, value: Option<T>) {
    let Some(value) = value else { return };
    if slot.as_ref().map_or(true, |current| rank < current.rank) {
        *slot = Some(Ranked { rank, value });
    }
}

#[derive(Debug)]
struct RawRow {
    timestamp: DateTime<Utc>,
    rank: Rank,
    values: [Option<f64>; Variable::COUNT],
}

#[derive(Debug, Default)]
struct StationBuilder {
    name: Option<Ranked<String>>,
    lat: Option<Ranked<f64>>,
    lon: Option<Ranked<f64>>,
    equipment_types: Vec<EquipmentType>,
    rows: Vec<RawRow>,
}

impl StationBuilder {
    /// Returns the station and the number of duplicate rows merged away
    fn finish(mut self, id: StationId) -> (Station, usize) {
        self.rows.sort_by_key(|r| (r.timestamp, r.rank));

        let mut readings: Vec<Reading> = Vec::with_capacity(self.rows.len());
        let mut merged = 0;
        for row in self.rows {
            match readings.last_mut() {
                Some(last) if last.timestamp == row.timestamp => {
                    for (slot, value) in last.values.iter_mut().zip(row.values) {
                        if slot.is_none() {
                            *slot = value;
                        }
                    }
                    merged += 1;
                }
                _ => readings.push(Reading {
                    timestamp: row.timestamp,
                    values: row.values,
                }),
            }
        }

        let equipment = self
            .equipment_types
            .iter()
            .copied()
            .min_by_key(|e| e.priority())
            .unwrap_or(EquipmentType::Unknown);

        let summary = StationSummary {
            station_id: id,
            station_name: self
                .name
                .map(|n| n.value)
                .unwrap_or_else(|| format!("Station {}", id)),
            lat: self.lat.map(|r| r.value),
            lon: self.lon.map(|r| r.value),
            equipment,
        };

        (Station::new(summary, self.equipment_types, readings), merged)
    }
}

/// Streams CSV rows into per-station builders.
pub struct Loader;

impl Loader {
    pub fn read<R: Read>(reader: R) -> Result<(Vec<Station>, Vec<Variable>, LoadStats)> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mapping = ColumnMapping::analyze(csv_reader.headers()?)?;
        debug!(
            "Resolved {} variable columns: {:?}",
            mapping.variables.len(),
            mapping.variables.iter().map(|(v, _)| v.column()).collect::<Vec<_>>()
        );

        let mut stats = LoadStats::default();
        let mut builders: HashMap<StationId, StationBuilder> = HashMap::new();

        for (order, record) in csv_reader.records().enumerate() {
            let record = record?;
            stats.total_rows += 1;
            let line = record.position().map_or(order + 2, |p| p.line() as usize);

            let raw_id = record.get(mapping.station_id).unwrap_or("");
            let station_id = parse_station_id(raw_id).ok_or_else(|| {
                AppError::Parse(format!("Invalid station_id '{}' on line {}", raw_id, line))
            })?;

            let raw_ts = record.get(mapping.timestamp).unwrap_or("");
            let timestamp = parse_timestamp(raw_ts)
                .map_err(|e| AppError::Parse(format!("{} on line {}", e, line)))?;

            let equipment = mapping
                .equipment
                .and_then(|i| record.get(i))
                .map_or(EquipmentType::Unknown, EquipmentType::parse);
            let rank = (equipment.priority(), order);

            let mut values = [None; Variable::COUNT];
            for &(variable, index) in &mapping.variables {
                match parse_cell(record.get(index)) {
                    Cell::Value(v) => values[variable.index()] = Some(v),
                    Cell::Missing => {}
                    Cell::Invalid => {
                        stats.invalid_values += 1;
                        debug!(
                            "Ignoring unparseable {} value '{}' on line {}",
                            variable.column(),
                            record.get(index).unwrap_or(""),
                            line
                        );
                    }
                }
            }

            let builder = builders.entry(station_id).or_default();
            if !builder.equipment_types.contains(&equipment) {
                builder.equipment_types.push(equipment);
            }
            let name = mapping
                .station_name
                .and_then(|i| record.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            offer(&mut builder.name, rank, name);
            offer(&mut builder.lat, rank, coordinate(record.get(mapping.lat)));
            offer(&mut builder.lon, rank, coordinate(record.get(mapping.lon)));
            builder.rows.push(RawRow {
                timestamp,
                rank,
                values,
            });
        }

        let mut stations = Vec::with_capacity(builders.len());
        for (id, builder) in builders {
            let (station, merged) = builder.finish(id);
            stats.merged_duplicates += merged;
            stats.readings += station.readings().len();
            stations.push(station);
        }
        stats.stations = stations.len();

        if stats.invalid_values > 0 {
            warn!(
                "{} unparseable variable values treated as missing",
                stats.invalid_values
            );
        }

        let variables = mapping.variables.iter().map(|(v, _)| *v).collect();
        Ok((stations, variables, stats))
    }
}

fn coordinate(raw: Option<&str>) -> Option<f64> {
    match parse_cell(raw) {
        Cell::Value(v) => Some(v),
        _ => None,
    }
}
