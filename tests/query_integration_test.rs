use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::io::Write;
use std::sync::Arc;
use station_resample::config::{Config, ResamplingConfig};
use station_resample::dataset::{Dataset, Variable};
use station_resample::query::{
    AnimationQuery, DailyAveragesQuery, QueryService, Request, SnapshotQuery, TimeSeriesQuery,
};
use tempfile::NamedTempFile;

const CSV: &str = "\
timestamp,station_id,station_name,tipo_equipo,lat,lon,temp,humedad,viento_dir,ica
2025-01-15 10:00:00,101,Centro,VUE+AIR,-33.44,-70.65,20.0,40,350,50
2025-01-15 11:00:00,101,Centro,VUE+AIR,-33.44,-70.65,26.0,50,10,60
2025-01-15 10:00:00,101,Centro AirLink,AIR,-33.44,-70.65,NA,NA,NA,99
2025-01-15 10:15:00,202,Norte,AIR,-33.30,-70.60,18.0,NA,NA,NA
2025-01-16 09:00:00,202,Norte,AIR,-33.30,-70.60,12.0,70,NA,30
";

fn service() -> QueryService {
    let dataset = Dataset::from_reader(CSV.as_bytes(), "inline").expect("Load failed");
    QueryService::new(Arc::new(dataset), ResamplingConfig::default())
}

fn vars(names: &[&str]) -> Option<Vec<String>> {
    Some(names.iter().map(|s| s.to_string()).collect())
}

#[test]
fn test_list_and_airlink_stations() {
    let service = service();

    let all = service.list_stations();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].station_id, 101);
    assert_eq!(all[0].station_name, "Centro");

    let airlink = service.airlink_stations();
    assert_eq!(airlink.len(), 1);
    assert_eq!(airlink[0].station_id, 202);
}

#[test]
fn test_snapshot_between_readings() {
    let service = service();
    let snapshot = service
        .get_snapshot(&SnapshotQuery {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap(),
            variables: vars(&["temperature", "viento_dir", "ica"]),
        })
        .expect("Snapshot failed");

    assert_eq!(
        snapshot.variables,
        vec![Variable::Temperature, Variable::WindDirection, Variable::Aqi]
    );

    let centro = snapshot.station(101).unwrap();
    assert_eq!(centro.values.get(Variable::Temperature), Some(23.0));
    assert_eq!(centro.values.get(Variable::WindDirection), Some(0.0));
    // the VUE+AIR row wins the duplicate at 10:00, so 50 -> 60
    assert_eq!(centro.values.get(Variable::Aqi), Some(55.0));

    // next reading after 10:15 is a day later
    let norte = snapshot.station(202).unwrap();
    assert!(!norte.has_data);
    assert_eq!(norte.values.get(Variable::Temperature), None);
}

#[test]
fn test_snapshot_unknown_variable() {
    let err = service()
        .get_snapshot(&SnapshotQuery {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap(),
            variables: vars(&["ozone"]),
        })
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_animation_within_limits() {
    let service = service();
    let animation = service
        .get_animation(&AnimationQuery {
            start: Some(Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()),
            end: Some(Utc.with_ymd_and_hms(2025, 1, 15, 11, 0, 0).unwrap()),
            interval: Some(Duration::minutes(15)),
            variables: vars(&["temp"]),
        })
        .unwrap();

    assert_eq!(animation.frame_count(), 5);
    let temps: Vec<_> = animation
        .frames()
        .map(|f| f.station(101).unwrap().values.get(Variable::Temperature))
        .collect();
    assert_eq!(temps, vec![Some(20.0), Some(21.5), Some(23.0), Some(24.5), Some(26.0)]);

    let json = serde_json::to_value(&animation).unwrap();
    assert_eq!(json["frame_count"], 5);
    assert_eq!(json["interval_seconds"], 900);
    assert_eq!(json["frames"].as_array().unwrap().len(), 5);
}

#[test]
fn test_animation_too_large_is_rejected() {
    let dataset = Dataset::from_reader(CSV.as_bytes(), "inline").unwrap();
    let config = ResamplingConfig {
        max_frames: 24,
        ..ResamplingConfig::default()
    };
    let service = QueryService::new(Arc::new(dataset), config);

    // dataset bounds span 23 hours: 24 hourly frames fit, 15-minute ones do not
    assert_eq!(
        service
            .get_animation(&AnimationQuery::default())
            .unwrap()
            .frame_count(),
        24
    );
    let err = service
        .get_animation(&AnimationQuery {
            interval: Some(Duration::minutes(15)),
            ..AnimationQuery::default()
        })
        .unwrap_err();
    assert_eq!(err.kind(), "range_too_large");
}

#[test]
fn test_time_series_unknown_station() {
    let err = service()
        .get_time_series(&TimeSeriesQuery {
            station_id: 999,
            variables: None,
            start: None,
            end: None,
            interval: None,
        })
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.kind(), "not_found");
}

#[test]
fn test_time_series_native_defaults_to_dataset_range() {
    let series = service()
        .get_time_series(&TimeSeriesQuery {
            station_id: 202,
            variables: vars(&["temp", "humedad"]),
            start: None,
            end: None,
            interval: None,
        })
        .unwrap();

    let temp = series.variable(Variable::Temperature).unwrap();
    assert_eq!(temp.points.len(), 2);
    assert_eq!(temp.points[1].value, Some(12.0));
    let humidity = series.variable(Variable::Humidity).unwrap();
    assert_eq!(humidity.points[0].value, None);
}

#[test]
fn test_daily_averages() {
    let averages = service()
        .daily_averages(&DailyAveragesQuery {
            date: NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
            variables: vars(&["temp", "ica"]),
        })
        .unwrap();

    assert_eq!(averages.total_stations, 2);
    assert_eq!(averages.stations_with_data, 2);
    let centro = &averages.stations[0];
    assert_eq!(centro.get(Variable::Temperature).unwrap().average, 23.0);
    assert_eq!(centro.get(Variable::Aqi).unwrap().count, 2);
}

#[test]
fn test_execute_json_shapes() {
    let service = service();

    let request: Request = serde_json::from_str(
        r#"{"query":"snapshot","timestamp":"2025-01-15T10:30:00Z","variables":["temp"]}"#,
    )
    .unwrap();
    let value = service.execute(&request).unwrap();
    assert_eq!(value["timestamp"], "2025-01-15T10:30:00Z");
    assert_eq!(value["variables"][0], "temperature");
    assert_eq!(value["stations"][0]["station_id"], 101);
    assert_eq!(value["stations"][0]["has_data"], true);
    assert_eq!(value["stations"][0]["values"]["temperature"], 23.0);

    let request: Request = serde_json::from_str(
        r#"{"query":"time_series","station_id":101,"start":"2025-01-15 10:00","end":"2025-01-15 11:00","interval":"30min","variables":["temp"]}"#,
    )
    .unwrap();
    let value = service.execute(&request).unwrap();
    assert_eq!(value["mode"], "regular");
    assert_eq!(value["interval_seconds"], 1800);
    assert_eq!(value["series"][0]["points"][1]["value"], 23.0);

    let value = service.execute(&Request::Summary).unwrap();
    assert_eq!(value["stations_count"], 2);
    assert_eq!(value["total_records"], 4);
}

#[test]
fn test_service_from_config_file() {
    let mut csv = NamedTempFile::new().unwrap();
    csv.write_all(CSV.as_bytes()).unwrap();

    let mut yaml = NamedTempFile::new().unwrap();
    write!(
        yaml,
        "dataset:\n  csv_path: {}\nresampling:\n  max_gap: 10\n  default_variables: [temp]\n",
        csv.path().display()
    )
    .unwrap();

    let config = Config::load(yaml.path()).expect("Config load failed");
    let dataset = Dataset::load(&config.dataset.csv_path).expect("Load failed");
    let service = QueryService::new(Arc::new(dataset), config.resampling);

    let snapshot = service
        .get_snapshot(&SnapshotQuery {
            timestamp: Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 0).unwrap(),
            variables: None,
        })
        .unwrap();
    assert_eq!(snapshot.variables, vec![Variable::Temperature]);
    // readings an hour apart exceed the 10 minute tolerance
    assert_eq!(
        snapshot.station(101).unwrap().values.get(Variable::Temperature),
        None
    );
}
