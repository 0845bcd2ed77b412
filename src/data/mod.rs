//! Sensor data ingestion: payload normalization and cleaning
//!
//! Raw JSON from the sensor API is reconciled into `SensorSample` rows by
//! [`schema`], then filtered, ordered and gap-annotated by [`cleaning`].

pub mod cleaning;
pub mod schema;

pub use cleaning::{clean, CleanedSample, CleaningReport};
pub use schema::{normalize_samples, parse_threshold};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One sensor reading in canonical form.
///
/// Missing numeric values are NaN and never survive cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Wall-clock time of the reading, in the offset the sensor reported
    pub timestamp: NaiveDateTime,
    /// Soil humidity in percent
    pub soil_humidity: f64,
    /// Air humidity in percent
    pub air_humidity: f64,
    /// Air temperature in °C
    pub temperature: f64,
    /// Raw light sensor value
    pub light: f64,
}
