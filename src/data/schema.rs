//! Payload schema reconciliation
//!
//! The sensor API has shipped three payload shapes over time:
//!
//! - `{"response": {"list": [{"SampleDTO": {...}}, ...]}}`
//! - `[{"SampleDTO": {...}}, ...]`
//! - `[{...}, ...]`
//!
//! Column names drift between `soilHumidity`, `soil_humidity`,
//! `SoilHumidity` and friends. Everything is reduced to `SensorSample`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::SensorSample;
use crate::error::{DrytimeError, Result};

const DTO_KEY: &str = "SampleDTO";

/// Canonical columns a sample is assembled from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Timestamp,
    SoilHumidity,
    AirHumidity,
    Temperature,
    Light,
}

impl Column {
    const REQUIRED: [Column; 5] = [
        Column::SoilHumidity,
        Column::AirHumidity,
        Column::Temperature,
        Column::Light,
        Column::Timestamp,
    ];

    /// Map a raw key onto a canonical column after normalization
    fn from_key(key: &str) -> Option<Self> {
        match normalize_key(key).as_str() {
            "soilhumidity" => Some(Column::SoilHumidity),
            "airhumidity" => Some(Column::AirHumidity),
            "airtemperature" | "temperature" => Some(Column::Temperature),
            "lightvalue" | "light" => Some(Column::Light),
            "timestamp" => Some(Column::Timestamp),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Column::Timestamp => "timestamp",
            Column::SoilHumidity => "soil_humidity",
            Column::AirHumidity => "air_humidity",
            Column::Temperature => "temperature",
            Column::Light => "light",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Column::Timestamp => 1,
            Column::SoilHumidity => 1 << 1,
            Column::AirHumidity => 1 << 2,
            Column::Temperature => 1 << 3,
            Column::Light => 1 << 4,
        }
    }
}

/// Strip everything that is not alphanumeric and lowercase the rest
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// The recognized payload layouts
#[derive(Debug)]
enum Payload<'a> {
    /// `{response: {list: [...]}}`
    Wrapped(&'a [Value]),
    /// `[{SampleDTO: {...}}, ...]`
    DtoList(&'a [Value]),
    /// `[{...}, ...]`
    Records(&'a [Value]),
}

impl<'a> Payload<'a> {
    fn classify(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(obj) => obj
                .get("response")
                .and_then(|r| r.get("list"))
                .and_then(Value::as_array)
                .map(|list| Payload::Wrapped(list.as_slice()))
                .ok_or_else(|| {
                    DrytimeError::Schema(
                        "object payload without a response.list array".to_string(),
                    )
                }),
            Value::Array(items) => match items.first() {
                None => Err(DrytimeError::Schema("payload list is empty".to_string())),
                Some(Value::Object(first)) if first.contains_key(DTO_KEY) => {
                    Ok(Payload::DtoList(items.as_slice()))
                }
                Some(Value::Object(_)) => Ok(Payload::Records(items.as_slice())),
                Some(other) => Err(DrytimeError::Schema(format!(
                    "list elements must be objects, found {}",
                    json_kind(other)
                ))),
            },
            other => Err(DrytimeError::Schema(format!(
                "unsupported payload type: {}",
                json_kind(other)
            ))),
        }
    }

    /// Flatten into one record per sample
    fn records(&self) -> Result<Vec<&'a Map<String, Value>>> {
        match self {
            Payload::Wrapped(items) => items
                .iter()
                .map(|item| {
                    let obj = as_object(item)?;
                    match obj.get(DTO_KEY) {
                        Some(inner) => as_object(inner),
                        None => Ok(obj),
                    }
                })
                .collect(),
            Payload::DtoList(items) => items
                .iter()
                .map(|item| {
                    as_object(item)?
                        .get(DTO_KEY)
                        .ok_or_else(|| {
                            DrytimeError::Schema(format!("element without a {} key", DTO_KEY))
                        })
                        .and_then(as_object)
                })
                .collect(),
            Payload::Records(items) => items.iter().map(as_object).collect(),
        }
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        DrytimeError::Schema(format!("expected an object record, found {}", json_kind(value)))
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reconcile a raw sensor payload into canonical samples.
///
/// Records whose timestamp is null or missing are skipped. Numeric fields
/// that are null, missing or not numeric become NaN.
///
/// # Errors
///
/// Returns `DrytimeError::Schema` if the payload shape is not recognized,
/// a required column is absent from every record, or a timestamp cannot be
/// parsed.
pub fn normalize_samples(payload: &Value) -> Result<Vec<SensorSample>> {
    let shape = Payload::classify(payload)?;
    let records = shape.records()?;

    let mut seen = 0u8;
    let mut ignored: Vec<&str> = Vec::new();
    let mut samples = Vec::with_capacity(records.len());
    let mut skipped = 0usize;

    for record in &records {
        let mut timestamp: Option<&Value> = None;
        let mut soil = f64::NAN;
        let mut air = f64::NAN;
        let mut temperature = f64::NAN;
        let mut light = f64::NAN;

        for (key, value) in record.iter() {
            let Some(column) = Column::from_key(key) else {
                if !ignored.contains(&key.as_str()) {
                    ignored.push(key.as_str());
                }
                continue;
            };
            seen |= column.bit();
            match column {
                Column::Timestamp => timestamp = Some(value),
                Column::SoilHumidity => soil = numeric(value),
                Column::AirHumidity => air = numeric(value),
                Column::Temperature => temperature = numeric(value),
                Column::Light => light = numeric(value),
            }
        }

        let timestamp = match timestamp {
            None | Some(Value::Null) => {
                skipped += 1;
                continue;
            }
            Some(Value::String(raw)) => parse_timestamp(raw)?,
            Some(other) => {
                return Err(DrytimeError::Schema(format!(
                    "timestamp must be a string, found {}",
                    json_kind(other)
                )))
            }
        };

        samples.push(SensorSample {
            timestamp,
            soil_humidity: soil,
            air_humidity: air,
            temperature,
            light,
        });
    }

    let missing: Vec<&str> = Column::REQUIRED
        .iter()
        .filter(|c| seen & c.bit() == 0)
        .map(Column::name)
        .collect();
    if !missing.is_empty() {
        return Err(DrytimeError::Schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    if !ignored.is_empty() {
        debug!(columns = ?ignored, "Ignoring unrecognized columns");
    }
    if skipped > 0 {
        warn!(skipped, "Skipped records without a timestamp");
    }
    debug!(shape = shape_name(&shape), samples = samples.len(), "Normalized sensor payload");

    Ok(samples)
}

fn shape_name(shape: &Payload<'_>) -> &'static str {
    match shape {
        Payload::Wrapped(_) => "wrapped",
        Payload::DtoList(_) => "dto_list",
        Payload::Records(_) => "records",
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

/// Parse the timestamp forms the sensor API has produced.
///
/// An explicit offset is kept as the wall-clock reading in that offset, so the
/// hour of day is the hour the sensor reported.
fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt);
        }
    }
    Err(DrytimeError::Schema(format!("unparseable timestamp '{}'", raw)))
}

/// Extract the soil-humidity threshold from its payload.
///
/// Accepts a bare number, a numeric string, or an object with a key whose
/// normalized form contains `threshold`.
pub fn parse_threshold(payload: &Value) -> Result<f64> {
    let value = match payload {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Object(obj) => {
            let found = obj
                .iter()
                .find(|(key, _)| normalize_key(key).contains("threshold"))
                .map(|(_, v)| v);
            match found {
                Some(inner @ (Value::Number(_) | Value::String(_))) => {
                    return parse_threshold(inner)
                }
                _ => None,
            }
        }
        _ => None,
    };

    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(DrytimeError::Schema(format!("threshold is not finite: {}", v))),
        None => Err(DrytimeError::Schema(format!(
            "unrecognized threshold payload: {}",
            payload
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "soilHumidity": 42.5,
            "airHumidity": "55",
            "airTemperature": 21.0,
            "lightValue": 300,
            "timestamp": "2025-01-01T08:00:00"
        })
    }

    #[test]
    fn test_three_shapes_agree() {
        let wrapped = json!({"response": {"list": [{"SampleDTO": record()}]}});
        let dto = json!([{"SampleDTO": record()}]);
        let flat = json!([record()]);

        let a = normalize_samples(&wrapped).unwrap();
        let b = normalize_samples(&dto).unwrap();
        let c = normalize_samples(&flat).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].air_humidity, 55.0);
        assert_eq!(a[0].light, 300.0);
    }

    #[test]
    fn test_canonical_and_pascal_names() {
        let payload = json!([{
            "soil_humidity": 10.0,
            "Air_Humidity": 40.0,
            "temperature": 20.0,
            "light": 1.0,
            "TimeStamp": "2025-01-01 08:00:00",
            "sensorId": "abc"
        }]);
        let samples = normalize_samples(&payload).unwrap();
        assert_eq!(samples[0].soil_humidity, 10.0);
        assert_eq!(samples[0].temperature, 20.0);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let payload = json!([{"soilHumidity": 1.0, "timestamp": "2025-01-01"}]);
        let err = normalize_samples(&payload).unwrap_err();
        assert!(matches!(err, DrytimeError::Schema(ref m) if m.contains("air_humidity")));
    }

    #[test]
    fn test_unknown_shapes_rejected() {
        assert!(normalize_samples(&json!([])).is_err());
        assert!(normalize_samples(&json!([1, 2])).is_err());
        assert!(normalize_samples(&json!({"data": []})).is_err());
        assert!(normalize_samples(&json!("text")).is_err());
    }

    #[test]
    fn test_null_values_become_nan_and_null_timestamps_skip() {
        let payload = json!([
            {"soilHumidity": null, "airHumidity": 50, "airTemperature": 20, "lightValue": 1,
             "timestamp": "2025-01-01T00:00:00"},
            {"soilHumidity": 10, "airHumidity": 50, "airTemperature": 20, "lightValue": 1,
             "timestamp": null}
        ]);
        let samples = normalize_samples(&payload).unwrap();
        assert_eq!(samples.len(), 1);
        assert!(samples[0].soil_humidity.is_nan());
    }

    #[test]
    fn test_timestamp_formats() {
        let local = parse_timestamp("2025-01-01T10:00:00+02:00").unwrap();
        assert_eq!(local, parse_timestamp("2025-01-01T10:00:00").unwrap());
        assert_eq!(
            parse_timestamp("2025-01-01T10:00:00Z").unwrap(),
            parse_timestamp("2025-01-01 10:00:00").unwrap()
        );
        assert!(parse_timestamp("2025-01-01T08:00:00.250").is_ok());
        assert!(parse_timestamp("2025-01-01").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_offset_readings_keep_reported_hour() {
        let mut first = record();
        first["timestamp"] = json!("2024-05-01T23:50:00+02:00");
        let mut second = record();
        second["timestamp"] = json!("2024-05-02T00:00:00+02:00");

        let samples = normalize_samples(&json!([first, second])).unwrap();
        assert_eq!(samples[0].timestamp.hour(), 23);
        assert_eq!(samples[1].timestamp.hour(), 0);
        assert_eq!(
            (samples[1].timestamp - samples[0].timestamp).num_minutes(),
            10
        );
    }

    #[test]
    fn test_bad_timestamp_fails_whole_payload() {
        let mut bad = record();
        bad["timestamp"] = json!("not a time");
        assert!(matches!(
            normalize_samples(&json!([record(), bad])),
            Err(DrytimeError::Schema(_))
        ));
    }

    #[test]
    fn test_threshold_forms() {
        assert_eq!(parse_threshold(&json!(35)).unwrap(), 35.0);
        assert_eq!(parse_threshold(&json!("27.5")).unwrap(), 27.5);
        assert_eq!(parse_threshold(&json!({"soilHumidityThreshold": 30})).unwrap(), 30.0);
        assert_eq!(parse_threshold(&json!({"threshold": "12"})).unwrap(), 12.0);
        assert!(parse_threshold(&json!({"value": 30})).is_err());
        assert!(parse_threshold(&json!(null)).is_err());
        assert!(parse_threshold(&json!("NaN")).is_err());
    }
}
