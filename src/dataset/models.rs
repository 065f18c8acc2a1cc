use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub type StationId = i64;

/// The closed set of measured quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variable {
    Temperature,
    Humidity,
    Pressure,
    WindSpeed,
    WindDirection,
    Pm1,
    Pm2_5,
    Pm10,
    Aqi,
    Precipitation,
}

impl Variable {
    pub const COUNT: usize = 10;

    /// Canonical order
    pub const ALL: [Variable; Variable::COUNT] = [
        Variable::Temperature,
        Variable::Humidity,
        Variable::Pressure,
        Variable::WindSpeed,
        Variable::WindDirection,
        Variable::Pm1,
        Variable::Pm2_5,
        Variable::Pm10,
        Variable::Aqi,
        Variable::Precipitation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Variable::Temperature => "temperature",
            Variable::Humidity => "humidity",
            Variable::Pressure => "pressure",
            Variable::WindSpeed => "wind_speed",
            Variable::WindDirection => "wind_direction",
            Variable::Pm1 => "pm1",
            Variable::Pm2_5 => "pm2_5",
            Variable::Pm10 => "pm10",
            Variable::Aqi => "aqi",
            Variable::Precipitation => "precipitation",
        }
    }

    /// Column header in the source CSV
    pub fn column(self) -> &'static str {
        match self {
            Variable::Temperature => "temp",
            Variable::Humidity => "humedad",
            Variable::Pressure => "presion",
            Variable::WindSpeed => "viento_vel",
            Variable::WindDirection => "viento_dir",
            Variable::Pm1 => "pm_1",
            Variable::Pm2_5 => "pm_2_5",
            Variable::Pm10 => "pm_10",
            Variable::Aqi => "ica",
            Variable::Precipitation => "precipitacion",
        }
    }

    /// Degrees on a circle; interpolated along the shorter arc.
    pub fn is_circular(self) -> bool {
        matches!(self, Variable::WindDirection)
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for Variable {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Variable::ALL
            .into_iter()
            .find(|v| v.name() == wanted || v.column() == wanted)
            .ok_or_else(|| AppError::UnknownVariable(s.trim().to_string()))
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Variable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Serializes `(variable, value)` pairs as a map keyed by variable name, keeping their order.
#[allow(clippy::ptr_arg)]
pub(crate) fn serialize_variable_map<S, T>(
    entries: &Vec<(Variable, T)>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (variable, value) in entries {
        map.serialize_entry(variable.name(), value)?;
    }
    map.end()
}

/// Device family reported in the `tipo_equipo` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EquipmentType {
    #[serde(rename = "VUE+AIR")]
    VueAir,
    #[serde(rename = "PRO")]
    Pro,
    #[serde(rename = "AIR")]
    Air,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl EquipmentType {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "VUE+AIR" => EquipmentType::VueAir,
            "PRO" => EquipmentType::Pro,
            "AIR" => EquipmentType::Air,
            _ => EquipmentType::Unknown,
        }
    }

    /// Lower wins when one station id is reported by several devices
    pub fn priority(self) -> u8 {
        match self {
            EquipmentType::VueAir => 1,
            EquipmentType::Pro => 2,
            EquipmentType::Air => 3,
            EquipmentType::Unknown => 4,
        }
    }
}

/// Static identity of a station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationSummary {
    pub station_id: StationId,
    pub station_name: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub equipment: EquipmentType,
}

/// One timestamped observation. Absent variables are `None`, never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub values: [Option<f64>; Variable::COUNT],
}

impl Reading {
    pub fn value(&self, variable: Variable) -> Option<f64> {
        self.values[variable.index()]
    }
}

/// Defined values of one variable at one station, in time order.
///
/// Timestamps are strictly increasing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    pub(crate) times: Vec<DateTime<Utc>>,
    pub(crate) values: Vec<f64>,
}

impl Series {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.times.first().copied()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.times.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_from_name_or_column() {
        assert_eq!("temperature".parse::<Variable>().unwrap(), Variable::Temperature);
        assert_eq!("temp".parse::<Variable>().unwrap(), Variable::Temperature);
        assert_eq!("HUMEDAD".parse::<Variable>().unwrap(), Variable::Humidity);
        assert_eq!(" viento_dir ".parse::<Variable>().unwrap(), Variable::WindDirection);
        assert_eq!("pm_2_5".parse::<Variable>().unwrap(), Variable::Pm2_5);
    }

    #[test]
    fn test_unknown_variable_is_not_found() {
        let err = "ozone".parse::<Variable>().unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("ozone"));
    }

    #[test]
    fn test_canonical_order_matches_index() {
        for (i, v) in Variable::ALL.iter().enumerate() {
            assert_eq!(v.index(), i);
        }
    }

    #[test]
    fn test_only_wind_direction_is_circular() {
        let circular: Vec<_> = Variable::ALL.into_iter().filter(|v| v.is_circular()).collect();
        assert_eq!(circular, vec![Variable::WindDirection]);
    }

    #[test]
    fn test_equipment_priority() {
        assert_eq!(EquipmentType::parse("vue+air"), EquipmentType::VueAir);
        assert_eq!(EquipmentType::parse("weird"), EquipmentType::Unknown);
        assert!(EquipmentType::VueAir.priority() < EquipmentType::Pro.priority());
        assert!(EquipmentType::Pro.priority() < EquipmentType::Air.priority());
    }
}
