//! Whole-dataset summary and per-day station averages.

use crate::dataset::models::serialize_variable_map;
use crate::dataset::{Dataset, EquipmentType, StationId, TimeBounds, Variable};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableStats {
    pub variable: Variable,
    pub available: usize,
    pub stations_reporting: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataSummary {
    pub source: String,
    pub total_records: usize,
    pub stations_count: usize,
    pub date_range: Option<TimeBounds>,
    pub variables: Vec<VariableStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub average: f64,
    pub count: usize,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationDailyAverages {
    pub station_id: StationId,
    pub station_name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub equipment: EquipmentType,
    pub record_count: usize,
    #[serde(serialize_with = "serialize_variable_map")]
    pub averages: Vec<(Variable, Option<Aggregate>)>,
}

impl StationDailyAverages {
    pub fn get(&self, variable: Variable) -> Option<&Aggregate> {
        self.averages
            .iter()
            .find(|(v, _)| *v == variable)
            .and_then(|(_, a)| a.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyAverages {
    pub date: NaiveDate,
    pub variables: Vec<Variable>,
    pub total_stations: usize,
    pub stations_with_data: usize,
    pub stations: Vec<StationDailyAverages>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Running min/max/sum over one variable
#[derive(Debug, Default)]
struct Accumulator {
    count: usize,
    sum: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn push(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        self.sum += v;
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    fn aggregate(&self) -> Option<Aggregate> {
        let mean = self.mean()?;
        Some(Aggregate {
            average: round2(mean),
            count: self.count,
            min: round2(self.min),
            max: round2(self.max),
        })
    }
}

pub fn summarize(dataset: &Dataset) -> DataSummary {
    let variables = dataset
        .variables()
        .iter()
        .map(|&variable| {
            let mut acc = Accumulator::default();
            let mut stations_reporting = 0;
            for station in dataset.stations().iter() {
                let series = station.series(variable);
                if !series.is_empty() {
                    stations_reporting += 1;
                }
                series.values().iter().for_each(|&v| acc.push(v));
            }
            VariableStats {
                variable,
                available: acc.count,
                stations_reporting,
                min: (acc.count > 0).then_some(acc.min),
                max: (acc.count > 0).then_some(acc.max),
                mean: acc.mean(),
            }
        })
        .collect();

    DataSummary {
        source: dataset.source().to_string(),
        total_records: dataset.stats().readings,
        stations_count: dataset.stations().len(),
        date_range: dataset.bounds(),
        variables,
    }
}

/// Aggregates each station's readings on one UTC calendar day.
///
/// Stations without readings that day are left out.
pub fn daily_averages(dataset: &Dataset, date: NaiveDate, variables: &[Variable]) -> DailyAverages {
    let day_start = date
        .and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive));
    let day_end = date
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive));

    let mut stations = Vec::new();
    if let (Some(day_start), Some(day_end)) = (day_start, day_end) {
        for station in dataset.stations().iter() {
            let readings = station.readings();
            let lo = readings.partition_point(|r| r.timestamp < day_start);
            let hi = readings.partition_point(|r| r.timestamp < day_end);
            let day = &readings[lo..hi];
            if day.is_empty() {
                continue;
            }

            let averages = variables
                .iter()
                .map(|&variable| {
                    let mut acc = Accumulator::default();
                    day.iter()
                        .filter_map(|r| r.value(variable))
                        .for_each(|v| acc.push(v));
                    (variable, acc.aggregate())
                })
                .collect();

            let summary = station.summary();
            stations.push(StationDailyAverages {
                station_id: summary.station_id,
                station_name: summary.station_name.clone(),
                lat: summary.lat,
                lon: summary.lon,
                equipment: summary.equipment,
                record_count: day.len(),
                averages,
            });
        }
    }

    DailyAverages {
        date,
        variables: variables.to_vec(),
        total_stations: dataset.stations().len(),
        stations_with_data: stations.len(),
        stations,
    }
}
