//! Point evaluation and the regular-grid operations built on it.
//!
//! Every value produced here comes from [`Series::value_at`]: an exact reading,
//! a linear (or, for wind direction, shortest-arc) interpolation between two
//! readings no further apart than the gap tolerance, or `None` for NoData.

use crate::config::ResamplingConfig;
use crate::dataset::models::serialize_variable_map;
use crate::dataset::{Dataset, Series, StationId, StationSummary, Variable};
use crate::error::{AppError, Result};
use crate::stations::Station;
use chrono::{DateTime, Duration, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tracing::debug;

impl Series {
    /// Value at `t`, or `None` when no trustworthy value exists.
    ///
    /// Outside the covered span the nearest reading is used while `t` stays
    /// within `max_gap` of it.
    pub fn value_at(&self, t: DateTime<Utc>, max_gap: Duration, circular: bool) -> Option<f64> {
        let first = self.first_time()?;
        let last = self.last_time()?;

        if t < first {
            return (first - t <= max_gap).then(|| self.values[0]);
        }
        if t > last {
            return (t - last <= max_gap).then(|| self.values[self.values.len() - 1]);
        }

        match self.times.binary_search(&t) {
            Ok(i) => Some(self.values[i]),
            Err(i) => {
                // first < t < last, so 0 < i < len
                let (t0, t1) = (self.times[i - 1], self.times[i]);
                let span = t1 - t0;
                if span > max_gap {
                    return None;
                }
                let fraction = ratio(t - t0, span);
                Some(interpolate(
                    self.values[i - 1],
                    self.values[i],
                    fraction,
                    circular,
                ))
            }
        }
    }
}

/// `part / whole` at nanosecond resolution; sub-millisecond spans are valid
fn ratio(part: Duration, whole: Duration) -> f64 {
    match (part.num_nanoseconds(), whole.num_nanoseconds()) {
        (Some(p), Some(w)) => p as f64 / w as f64,
        // only spans of centuries overflow nanoseconds
        _ => part.num_milliseconds() as f64 / whole.num_milliseconds() as f64,
    }
}

fn interpolate(v0: f64, v1: f64, fraction: f64, circular: bool) -> f64 {
    if !circular {
        return v0 + (v1 - v0) * fraction;
    }
    // signed shortest arc in [-180, 180)
    let delta = (v1 - v0 + 540.0).rem_euclid(360.0) - 180.0;
    (v0 + delta * fraction).rem_euclid(360.0)
}

/// Regular sampling instants `start, start + interval, ...` not past `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    start: DateTime<Utc>,
    interval: Duration,
    frames: usize,
}

impl Grid {
    /// Validates the range and sizes the grid before anything is evaluated
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
        max_frames: usize,
    ) -> Result<Self> {
        if end < start {
            return Err(AppError::InvalidRange(format!(
                "end {} is before start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        let interval_ms = interval.num_milliseconds();
        if interval_ms <= 0 {
            return Err(AppError::InvalidRange(format!(
                "interval must be positive, got {}s",
                interval.num_seconds()
            )));
        }

        let span_ms = (end - start).num_milliseconds();
        let frames = (span_ms / interval_ms) as u64 + 1;
        if frames > max_frames as u64 {
            return Err(AppError::RangeTooLarge {
                frames,
                max: max_frames,
            });
        }

        Ok(Self {
            start,
            interval,
            frames: frames as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn at(&self, k: usize) -> DateTime<Utc> {
        self.start + Duration::milliseconds(self.interval.num_milliseconds() * k as i64)
    }

    /// Last instant on the grid (may fall short of the requested end)
    pub fn last(&self) -> DateTime<Utc> {
        self.at(self.frames.saturating_sub(1))
    }

    pub fn timestamps(&self) -> impl ExactSizeIterator<Item = DateTime<Utc>> + '_ {
        (0..self.frames).map(move |k| self.at(k))
    }
}

/// Values for the requested variables, serialized as an ordered map with `null` for NoData.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableValues(Vec<(Variable, Option<f64>)>);

impl VariableValues {
    pub fn get(&self, variable: Variable) -> Option<f64> {
        self.0
            .iter()
            .find(|(v, _)| *v == variable)
            .and_then(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, Option<f64>)> + '_ {
        self.0.iter().copied()
    }

    pub fn has_data(&self) -> bool {
        self.0.iter().any(|(_, value)| value.is_some())
    }
}

impl Serialize for VariableValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_variable_map(&self.0, serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSnapshot {
    #[serde(flatten)]
    pub station: StationSummary,
    pub has_data: bool,
    pub values: VariableValues,
}

/// All stations' values at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub variables: Vec<Variable>,
    pub stations: Vec<StationSnapshot>,
}

impl Snapshot {
    pub fn station(&self, id: StationId) -> Option<&StationSnapshot> {
        self.stations.iter().find(|s| s.station.station_id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesMode {
    /// The station's own reading timestamps
    Native,
    /// Evenly spaced instants
    Regular,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSeries {
    pub variable: Variable,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeries {
    pub station: StationSummary,
    pub mode: SeriesMode,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub interval_seconds: Option<i64>,
    pub series: Vec<VariableSeries>,
}

impl TimeSeries {
    pub fn variable(&self, variable: Variable) -> Option<&VariableSeries> {
        self.series.iter().find(|s| s.variable == variable)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resampler<'a> {
    dataset: &'a Dataset,
    max_gap: Duration,
    max_frames: usize,
}

impl<'a> Resampler<'a> {
    pub fn new(dataset: &'a Dataset, max_gap: Duration, max_frames: usize) -> Self {
        Self {
            dataset,
            max_gap,
            max_frames,
        }
    }

    pub fn from_config(dataset: &'a Dataset, config: &ResamplingConfig) -> Self {
        Self::new(dataset, config.max_gap, config.max_frames)
    }

    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn value_at(&self, station: &Station, variable: Variable, t: DateTime<Utc>) -> Option<f64> {
        station
            .series(variable)
            .value_at(t, self.max_gap, variable.is_circular())
    }

    fn values_at(&self, station: &Station, variables: &[Variable], t: DateTime<Utc>) -> VariableValues {
        VariableValues(
            variables
                .iter()
                .map(|&v| (v, self.value_at(station, v, t)))
                .collect(),
        )
    }

    /// Every station in index order, including those with nothing to report.
    pub fn snapshot_at(&self, t: DateTime<Utc>, variables: &[Variable]) -> Snapshot {
        let stations = self
            .dataset
            .stations()
            .iter()
            .map(|station| {
                let values = self.values_at(station, variables, t);
                StationSnapshot {
                    station: station.summary().clone(),
                    has_data: values.has_data(),
                    values,
                }
            })
            .collect();

        Snapshot {
            timestamp: t,
            variables: variables.to_vec(),
            stations,
        }
    }

    pub fn animate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Duration,
        variables: &[Variable],
    ) -> Result<Animation<'a>> {
        let grid = Grid::new(start, end, interval, self.max_frames)?;
        debug!(
            "Animation {} -> {} every {}s: {} frames",
            start.to_rfc3339(),
            end.to_rfc3339(),
            interval.num_seconds(),
            grid.len()
        );
        Ok(Animation {
            resampler: *self,
            grid,
            end,
            variables: variables.to_vec(),
        })
    }

    /// Regular grid when `interval` is given, the station's native timestamps otherwise.
    pub fn series(
        &self,
        station: &Station,
        variables: &[Variable],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Option<Duration>,
    ) -> Result<TimeSeries> {
        let series = match interval {
            Some(interval) => {
                let grid = Grid::new(start, end, interval, self.max_frames)?;
                variables
                    .iter()
                    .map(|&variable| VariableSeries {
                        variable,
                        points: grid
                            .timestamps()
                            .map(|t| SeriesPoint {
                                timestamp: t,
                                value: self.value_at(station, variable, t),
                            })
                            .collect(),
                    })
                    .collect()
            }
            None => {
                if end < start {
                    return Err(AppError::InvalidRange(format!(
                        "end {} is before start {}",
                        end.to_rfc3339(),
                        start.to_rfc3339()
                    )));
                }
                let readings = station.readings();
                let lo = readings.partition_point(|r| r.timestamp < start);
                let hi = readings.partition_point(|r| r.timestamp <= end);
                let window = &readings[lo..hi];
                variables
                    .iter()
                    .map(|&variable| VariableSeries {
                        variable,
                        points: window
                            .iter()
                            .map(|r| SeriesPoint {
                                timestamp: r.timestamp,
                                value: r.value(variable),
                            })
                            .collect(),
                    })
                    .collect()
            }
        };

        Ok(TimeSeries {
            station: station.summary().clone(),
            mode: if interval.is_some() {
                SeriesMode::Regular
            } else {
                SeriesMode::Native
            },
            start,
            end,
            interval_seconds: interval.map(|i| i.num_seconds()),
            series,
        })
    }
}

/// A validated, lazily evaluated sequence of snapshots.
///
/// [`Animation::frames`] starts a fresh pass each call; dropping the
/// iterator stops evaluation.
#[derive(Debug, Clone)]
pub struct Animation<'a> {
    resampler: Resampler<'a>,
    grid: Grid,
    end: DateTime<Utc>,
    variables: Vec<Variable>,
}

impl<'a> Animation<'a> {
    pub fn frame_count(&self) -> usize {
        self.grid.len()
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn frames(&self) -> Frames<'_, 'a> {
        Frames {
            animation: self,
            next: 0,
        }
    }
}

pub struct Frames<'s, 'a> {
    animation: &'s Animation<'a>,
    next: usize,
}

impl Iterator for Frames<'_, '_> {
    type Item = Snapshot;

    fn next(&mut self) -> Option<Snapshot> {
        let animation = self.animation;
        if self.next >= animation.grid.len() {
            return None;
        }
        let t = animation.grid.at(self.next);
        self.next += 1;
        Some(animation.resampler.snapshot_at(t, &animation.variables))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.animation.grid.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Frames<'_, '_> {}

struct FrameStream<'s, 'a>(&'s Animation<'a>);

impl Serialize for FrameStream<'_, '_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.frames())
    }
}

impl Serialize for Animation<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Animation", 6)?;
        state.serialize_field("start", &self.grid.start())?;
        state.serialize_field("end", &self.end)?;
        state.serialize_field("interval_seconds", &self.grid.interval().num_seconds())?;
        state.serialize_field("frame_count", &self.grid.len())?;
        state.serialize_field("variables", &self.variables)?;
        state.serialize_field("frames", &FrameStream(self))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn series(points: &[(i64, f64)]) -> Series {
        Series {
            times: points.iter().map(|(s, _)| t(*s)).collect(),
            values: points.iter().map(|(_, v)| *v).collect(),
        }
    }

    #[test]
    fn test_linear_midpoint() {
        let s = series(&[(0, 20.0), (60, 26.0)]);
        assert_eq!(s.value_at(t(30), Duration::minutes(5), false), Some(23.0));
    }

    #[test]
    fn test_exact_timestamps_return_stored_values() {
        let s = series(&[(0, 20.1), (60, 26.7), (90, -3.3)]);
        for (i, time) in s.times().iter().enumerate() {
            assert_eq!(s.value_at(*time, Duration::minutes(5), false), Some(s.values()[i]));
        }
    }

    #[test]
    fn test_gap_wider_than_tolerance_is_no_data() {
        let s = series(&[(0, 1.0), (7200, 2.0)]);
        assert_eq!(s.value_at(t(3600), Duration::hours(1), false), None);
        assert_eq!(s.value_at(t(3600), Duration::hours(2), false), Some(1.5));
    }

    #[test]
    fn test_outside_coverage() {
        let s = series(&[(600, 5.0), (1200, 6.0)]);
        let gap = Duration::minutes(5);
        assert_eq!(s.value_at(t(400), gap, false), Some(5.0));
        assert_eq!(s.value_at(t(0), gap, false), None);
        assert_eq!(s.value_at(t(1500), gap, false), Some(6.0));
        assert_eq!(s.value_at(t(1600), gap, false), None);
    }

    #[test]
    fn test_sub_millisecond_readings_interpolate() {
        let at = |nanos: u32| Utc.timestamp_opt(0, nanos).unwrap();
        let s = Series {
            times: vec![at(900_000), at(1_800_000)],
            values: vec![0.0, 9.0],
        };

        let value = s
            .value_at(at(1_700_000), Duration::minutes(5), false)
            .unwrap();
        assert!(value.is_finite());
        assert!((value - 8.0).abs() < 1e-9);

        let wind = s.value_at(at(1_350_000), Duration::minutes(5), true).unwrap();
        assert!((wind - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_falls_back_for_huge_spans() {
        let whole = Duration::days(365 * 400);
        assert!(whole.num_nanoseconds().is_none());
        assert_eq!(ratio(Duration::days(365 * 100), whole), 0.25);
    }

    #[test]
    fn test_empty_series_is_no_data() {
        let s = Series::default();
        assert_eq!(s.value_at(t(0), Duration::hours(1), false), None);
    }

    #[test]
    fn test_wind_direction_wraps_through_north() {
        let s = series(&[(0, 350.0), (60, 10.0)]);
        let gap = Duration::minutes(5);
        assert_eq!(s.value_at(t(30), gap, true), Some(0.0));
        assert_eq!(s.value_at(t(15), gap, true), Some(355.0));
        assert_eq!(s.value_at(t(45), gap, true), Some(5.0));
        // a linear variable would go through 180
        assert_eq!(s.value_at(t(30), gap, false), Some(180.0));
    }

    #[test]
    fn test_wind_direction_counter_clockwise() {
        let s = series(&[(0, 10.0), (60, 350.0)]);
        assert_eq!(s.value_at(t(30), Duration::minutes(5), true), Some(0.0));
        assert_eq!(s.value_at(t(45), Duration::minutes(5), true), Some(355.0));
    }

    #[test]
    fn test_grid_frame_count() {
        let grid = Grid::new(t(0), t(120), Duration::seconds(60), 100).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.timestamps().collect::<Vec<_>>(), vec![t(0), t(60), t(120)]);

        let grid = Grid::new(t(0), t(130), Duration::seconds(60), 100).unwrap();
        assert_eq!(grid.len(), 3);
        assert_eq!(grid.last(), t(120));
    }

    #[test]
    fn test_grid_interval_larger_than_range() {
        let grid = Grid::new(t(0), t(100), Duration::seconds(500), 100).unwrap();
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.at(0), t(0));
    }

    #[test]
    fn test_grid_rejects_bad_ranges() {
        let err = Grid::new(t(100), t(0), Duration::seconds(10), 100).unwrap_err();
        assert!(matches!(err, AppError::InvalidRange(_)));

        let err = Grid::new(t(0), t(100), Duration::zero(), 100).unwrap_err();
        assert!(matches!(err, AppError::InvalidRange(_)));

        let err = Grid::new(t(0), t(100), Duration::seconds(-10), 100).unwrap_err();
        assert!(matches!(err, AppError::InvalidRange(_)));
    }

    #[test]
    fn test_grid_rejects_rather_than_truncates() {
        let err = Grid::new(t(0), t(1000), Duration::seconds(1), 100).unwrap_err();
        match err {
            AppError::RangeTooLarge { frames, max } => {
                assert_eq!(frames, 1001);
                assert_eq!(max, 100);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_variable_values_serialize_in_order_with_nulls() {
        let values = VariableValues(vec![
            (Variable::Humidity, Some(40.0)),
            (Variable::Temperature, None),
        ]);
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, r#"{"humidity":40.0,"temperature":null}"#);
        assert!(values.has_data());
    }
}
