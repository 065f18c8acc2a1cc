//! Request shapes and the service that answers them against one dataset.

use crate::config::ResamplingConfig;
use crate::dataset::{Dataset, StationId, StationSummary, Variable};
use crate::error::{AppError, Result};
use crate::resample::{Animation, Resampler, Snapshot, TimeSeries};
use crate::stats::{self, DailyAverages, DataSummary};
use crate::time::{parse_date, parse_interval, parse_timestamp};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tracing::debug;

fn default_animation_interval() -> Duration {
    Duration::hours(1)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_timestamp(&s).map_err(serde::de::Error::custom)
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|s| parse_timestamp(&s).map_err(serde::de::Error::custom))
        .transpose()
}

fn deserialize_date<'de, D>(deserializer: D) -> std::result::Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_date(&s).map_err(serde::de::Error::custom)
}

/// Accepts an interval string (`15min`, `1H`) or a number of seconds
fn deserialize_optional_interval<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntervalValue {
        Seconds(i64),
        Text(String),
    }

    match Option::<IntervalValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntervalValue::Seconds(s)) => crate::time::seconds_to_duration(s, 1)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("Interval of {}s is out of range", s))),
        Some(IntervalValue::Text(s)) => parse_interval(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotQuery {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct AnimationQuery {
    /// Defaults to the first reading in the dataset
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub start: Option<DateTime<Utc>>,
    /// Defaults to the last reading in the dataset
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub end: Option<DateTime<Utc>>,
    /// Defaults to one hour
    #[serde(default, deserialize_with = "deserialize_optional_interval")]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeSeriesQuery {
    pub station_id: StationId,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    pub end: Option<DateTime<Utc>>,
    /// Absent means the station's native timestamps
    #[serde(default, deserialize_with = "deserialize_optional_interval")]
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DailyAveragesQuery {
    #[serde(deserialize_with = "deserialize_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
}

/// One request on the line protocol, tagged by `query`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum Request {
    Stations {
        #[serde(default)]
        airlink_only: bool,
    },
    Snapshot(SnapshotQuery),
    Animation(AnimationQuery),
    TimeSeries(TimeSeriesQuery),
    Summary,
    DailyAverages(DailyAveragesQuery),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationList {
    pub total_stations: usize,
    pub stations: Vec<StationSummary>,
}

/// Result of one [`Request`], serialized without a tag.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Answer<'a> {
    Stations(StationList),
    Snapshot(Snapshot),
    Animation(Animation<'a>),
    TimeSeries(TimeSeries),
    Summary(DataSummary),
    DailyAverages(DailyAverages),
}

pub struct QueryService {
    dataset: Arc<Dataset>,
    config: ResamplingConfig,
}

impl QueryService {
    pub fn new(dataset: Arc<Dataset>, config: ResamplingConfig) -> Self {
        Self { dataset, config }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn resampler(&self) -> Resampler<'_> {
        Resampler::from_config(&self.dataset, &self.config)
    }

    /// Requested variables in request order, or the configured defaults
    pub fn resolve_variables(&self, requested: Option<&[String]>) -> Result<Vec<Variable>> {
        let requested = requested.unwrap_or_default();

        if requested.is_empty() {
            let available = self.dataset.variables();
            let defaults: Vec<Variable> = if self.config.default_variables.is_empty() {
                available.to_vec()
            } else {
                self.config
                    .default_variables
                    .iter()
                    .copied()
                    .filter(|v| available.contains(v))
                    .collect()
            };
            return Ok(defaults);
        }

        let mut variables = Vec::with_capacity(requested.len());
        for name in requested {
            let variable: Variable = name.parse()?;
            if !self.dataset.has_variable(variable) {
                return Err(AppError::UnknownVariable(format!(
                    "{} (not present in {})",
                    name,
                    self.dataset.source()
                )));
            }
            if !variables.contains(&variable) {
                variables.push(variable);
            }
        }
        Ok(variables)
    }

    fn default_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let bounds = self.dataset.bounds();
        let start = start.or(bounds.map(|b| b.start));
        let end = end.or(bounds.map(|b| b.end));
        start.zip(end).ok_or_else(|| {
            AppError::InvalidRange("start and end are required for an empty dataset".to_string())
        })
    }

    pub fn list_stations(&self) -> Vec<StationSummary> {
        self.dataset.stations().stations()
    }

    pub fn airlink_stations(&self) -> Vec<StationSummary> {
        self.dataset.stations().airlink_stations()
    }

    pub fn get_snapshot(&self, query: &SnapshotQuery) -> Result<Snapshot> {
        let variables = self.resolve_variables(query.variables.as_deref())?;
        debug!(
            "Snapshot at {} for {} variables",
            query.timestamp.to_rfc3339(),
            variables.len()
        );
        Ok(self.resampler().snapshot_at(query.timestamp, &variables))
    }

    pub fn get_animation(&self, query: &AnimationQuery) -> Result<Animation<'_>> {
        let variables = self.resolve_variables(query.variables.as_deref())?;
        let (start, end) = self.default_range(query.start, query.end)?;
        let interval = query.interval.unwrap_or_else(default_animation_interval);
        self.resampler().animate(start, end, interval, &variables)
    }

    pub fn get_time_series(&self, query: &TimeSeriesQuery) -> Result<TimeSeries> {
        let station = self.dataset.stations().station(query.station_id)?;
        let variables = self.resolve_variables(query.variables.as_deref())?;
        let (start, end) = self.default_range(query.start, query.end)?;
        debug!(
            "Time series for station {} from {} to {} ({})",
            query.station_id,
            start.to_rfc3339(),
            end.to_rfc3339(),
            query
                .interval
                .map_or_else(|| "native".to_string(), |i| format!("every {}s", i.num_seconds()))
        );
        self.resampler()
            .series(station, &variables, start, end, query.interval)
    }

    pub fn summary(&self) -> DataSummary {
        stats::summarize(&self.dataset)
    }

    pub fn daily_averages(&self, query: &DailyAveragesQuery) -> Result<DailyAverages> {
        let variables = self.resolve_variables(query.variables.as_deref())?;
        Ok(stats::daily_averages(&self.dataset, query.date, &variables))
    }

    /// Evaluate a request; animation frames stay lazy until serialized
    pub fn answer(&self, request: &Request) -> Result<Answer<'_>> {
        let answer = match request {
            Request::Stations { airlink_only } => {
                let stations = if *airlink_only {
                    self.airlink_stations()
                } else {
                    self.list_stations()
                };
                Answer::Stations(StationList {
                    total_stations: stations.len(),
                    stations,
                })
            }
            Request::Snapshot(q) => Answer::Snapshot(self.get_snapshot(q)?),
            Request::Animation(q) => Answer::Animation(self.get_animation(q)?),
            Request::TimeSeries(q) => Answer::TimeSeries(self.get_time_series(q)?),
            Request::Summary => Answer::Summary(self.summary()),
            Request::DailyAverages(q) => Answer::DailyAverages(self.daily_averages(q)?),
        };
        Ok(answer)
    }

    /// Answer any request as a JSON tree
    pub fn execute(&self, request: &Request) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.answer(request)?)?)
    }
}
