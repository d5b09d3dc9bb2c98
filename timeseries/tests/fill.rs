use timeseries::timestamp::{is_micro_encoded, micro_to_iso};
use timeseries::{Error, FillOptions, TimeSeriesPoint, TimestampValue, fill_timeseries};

fn load(json: &str) -> Vec<TimeSeriesPoint> {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_mixed_encodings_are_normalized() {
    let data = load(
        r#"[
            {"timestamp": "2024-03-01T10:02:00Z", "count": 5},
            {"timestamp": 1709287200000000, "count": 1},
            {"timestamp": "1709287440000000", "count": 2}
        ]"#,
    );
    let filled = fill_timeseries(data, &FillOptions::default()).unwrap();

    let timestamps: Vec<String> = filled.iter().map(|p| p.timestamp.to_string()).collect();
    assert_eq!(
        timestamps,
        vec![
            "2024-03-01T10:00:00.000Z",
            "2024-03-01T10:01:00.000Z",
            "2024-03-01T10:02:00.000Z",
            "2024-03-01T10:03:00.000Z",
            "2024-03-01T10:04:00.000Z",
        ]
    );
    let counts: Vec<f64> = filled.iter().map(|p| p.values["count"]).collect();
    assert_eq!(counts, vec![1.0, 0.0, 5.0, 0.0, 2.0]);
}

#[test]
fn test_bucket_at_existing_minute_is_not_duplicated() {
    // 10:01:30 occupies the 10:01 bucket
    let data = load(
        r#"[
            {"timestamp": "2024-03-01T10:00:00Z", "count": 1},
            {"timestamp": "2024-03-01T10:01:30Z", "count": 1},
            {"timestamp": "2024-03-01T10:03:00Z", "count": 1}
        ]"#,
    );
    let filled = fill_timeseries(data, &FillOptions::default().with_interval("1m")).unwrap();
    assert_eq!(filled.len(), 4);
}

#[test]
fn test_custom_default_value_and_keys() {
    let data = load(
        r#"[
            {"timestamp": "2024-03-01T10:00:00Z", "ok_count": 1},
            {"timestamp": "2024-03-01T10:10:00Z", "error_count": 3}
        ]"#,
    );
    let options = FillOptions::default()
        .with_interval("5m")
        .with_default_value(-1.0);
    let filled = fill_timeseries(data, &options).unwrap();

    assert_eq!(filled.len(), 3);
    assert_eq!(filled[1].values.len(), 2);
    assert_eq!(filled[1].values["ok_count"], -1.0);
    assert_eq!(filled[1].values["error_count"], -1.0);
}

#[test]
fn test_invalid_bound() {
    let options = FillOptions::default().with_bounds(Some("not a date".to_string()), None);
    let err = fill_timeseries(Vec::new(), &options).unwrap_err();
    assert!(matches!(err, Error::InvalidTimestamp(_)));
}

#[test]
fn test_serializes_flat() {
    let point = TimeSeriesPoint::new("2024-03-01T10:00:00.000Z").with_value("count", 2.0);
    let json = serde_json::to_value(&point).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"timestamp": "2024-03-01T10:00:00.000Z", "count": 2.0})
    );
    assert_eq!(
        TimestampValue::from(1659545029083869),
        TimestampValue::Micros(1659545029083869)
    );
    assert!(is_micro_encoded(1659545029083869_i64));
    assert!(micro_to_iso(1659545029083869_i64).unwrap().starts_with("2022-08-03"));
}
