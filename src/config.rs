//! Configuration for the training pipeline and the service around it
//!
//! Pipeline settings (`PipelineConfig` and friends) are plain serde structs with
//! defaults matching the reference sensor deployment. Service settings
//! (`AppConfig`) are read from the environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DrytimeError, Result};

/// Inclusive plausibility band for a single sensor channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// NaN is never inside a band.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Configuration for the data cleaner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningConfig {
    /// Soil humidity band in percent
    pub soil_humidity: Bounds,
    /// Air humidity band in percent
    pub air_humidity: Bounds,
    /// Air temperature band in °C
    pub temperature: Bounds,
    /// Raw light sensor band (10-bit ADC)
    pub light: Bounds,
    /// Gaps above this reset `soil_delta` to zero
    pub expected_interval_minutes: f64,
    /// Rows following a gap above this are dropped
    pub gap_drop_threshold_minutes: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            soil_humidity: Bounds::new(0.0, 100.0),
            air_humidity: Bounds::new(20.0, 90.0),
            temperature: Bounds::new(0.0, 50.0),
            light: Bounds::new(0.0, 1023.0),
            expected_interval_minutes: 10.0,
            gap_drop_threshold_minutes: 60.0,
        }
    }
}

impl CleaningConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the expected sampling interval
    pub fn with_expected_interval(mut self, minutes: f64) -> Self {
        self.expected_interval_minutes = minutes;
        self
    }

    /// Builder method to set the outage drop threshold
    pub fn with_gap_drop_threshold(mut self, minutes: f64) -> Self {
        self.gap_drop_threshold_minutes = minutes;
        self
    }

    pub fn with_air_humidity(mut self, bounds: Bounds) -> Self {
        self.air_humidity = bounds;
        self
    }

    pub fn with_temperature(mut self, bounds: Bounds) -> Self {
        self.temperature = bounds;
        self
    }

    pub fn with_light(mut self, bounds: Bounds) -> Self {
        self.light = bounds;
        self
    }

    fn validate(&self) -> Result<()> {
        let bands = [
            ("soil_humidity", self.soil_humidity),
            ("air_humidity", self.air_humidity),
            ("temperature", self.temperature),
            ("light", self.light),
        ];
        for (name, band) in bands {
            if !(band.min <= band.max) {
                return Err(DrytimeError::Config(format!(
                    "{} bounds are inverted: [{}, {}]",
                    name, band.min, band.max
                )));
            }
        }
        if !(self.expected_interval_minutes > 0.0) || !(self.gap_drop_threshold_minutes > 0.0) {
            return Err(DrytimeError::Config(
                "gap intervals must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Estimator family fitted by the model trainer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    /// Ridge-regularized linear regression
    Ridge,
    /// Bagged regression-tree ensemble
    RandomForest,
}

impl ModelVariant {
    /// Prefix of artifact file names
    pub fn artifact_basename(&self) -> &'static str {
        match self {
            ModelVariant::Ridge => "soil_humidity_baseline_ridge",
            ModelVariant::RandomForest => "soil_humidity_randomforest",
        }
    }

    /// Human-readable model type written into metadata
    pub fn model_type(&self) -> &'static str {
        match self {
            ModelVariant::Ridge => "Ridge (linear)",
            ModelVariant::RandomForest => "RandomForest",
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelVariant::Ridge => write!(f, "ridge"),
            ModelVariant::RandomForest => write!(f, "random_forest"),
        }
    }
}

impl FromStr for ModelVariant {
    type Err = DrytimeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "ridge" | "linear" | "linear_regression" => Ok(ModelVariant::Ridge),
            "random_forest" | "randomforest" | "rf" | "forest" => Ok(ModelVariant::RandomForest),
            other => Err(DrytimeError::Config(format!(
                "unknown model variant '{}' (expected ridge or random_forest)",
                other
            ))),
        }
    }
}

/// `n` points spaced evenly on a log10 scale between `10^start_exp` and `10^end_exp`
pub fn logspace(start_exp: f64, end_exp: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![10f64.powf(start_exp)],
        _ => {
            let step = (end_exp - start_exp) / (n - 1) as f64;
            (0..n)
                .map(|i| 10f64.powf(start_exp + step * i as f64))
                .collect()
        }
    }
}

/// Hyperparameter grid and cross-validation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of time-series folds
    pub n_splits: usize,
    /// Ridge regularization strengths
    pub ridge_alphas: Vec<f64>,
    /// Forest sizes
    pub forest_n_estimators: Vec<usize>,
    /// Forest depth limits (`None` = grow until pure)
    pub forest_max_depths: Vec<Option<usize>>,
    /// Seed for bootstrap sampling
    pub random_state: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_splits: 5,
            ridge_alphas: logspace(-4.0, 3.0, 20),
            forest_n_estimators: vec![50, 100, 200],
            forest_max_depths: vec![None, Some(5), Some(10), Some(20)],
            random_state: 42,
        }
    }
}

impl SearchConfig {
    pub fn with_n_splits(mut self, n_splits: usize) -> Self {
        self.n_splits = n_splits;
        self
    }

    pub fn with_ridge_alphas(mut self, alphas: Vec<f64>) -> Self {
        self.ridge_alphas = alphas;
        self
    }

    pub fn with_forest_grid(mut self, n_estimators: Vec<usize>, max_depths: Vec<Option<usize>>) -> Self {
        self.forest_n_estimators = n_estimators;
        self.forest_max_depths = max_depths;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    fn validate(&self, variant: ModelVariant) -> Result<()> {
        if self.n_splits < 2 {
            return Err(DrytimeError::Config(format!(
                "n_splits must be at least 2, got {}",
                self.n_splits
            )));
        }
        let empty = match variant {
            ModelVariant::Ridge => self.ridge_alphas.is_empty(),
            ModelVariant::RandomForest => {
                self.forest_n_estimators.is_empty() || self.forest_max_depths.is_empty()
            }
        };
        if empty {
            return Err(DrytimeError::Config(format!(
                "hyperparameter grid for {} is empty",
                variant
            )));
        }
        if self.ridge_alphas.iter().any(|a| !(*a >= 0.0)) {
            return Err(DrytimeError::Config("ridge alphas must be non-negative".to_string()));
        }
        if self.forest_n_estimators.iter().any(|&n| n == 0) {
            return Err(DrytimeError::Config("n_estimators must be positive".to_string()));
        }
        Ok(())
    }
}

/// Configuration for one training pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub variant: ModelVariant,
    pub cleaning: CleaningConfig,
    pub search: SearchConfig,
    /// Quantile used when the supplied threshold is unreachable
    pub threshold_fallback_quantile: f64,
    /// Directory that receives the ONNX and metadata files
    pub models_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            variant: ModelVariant::Ridge,
            cleaning: CleaningConfig::default(),
            search: SearchConfig::default(),
            threshold_fallback_quantile: 0.10,
            models_dir: PathBuf::from("./models"),
        }
    }
}

impl PipelineConfig {
    pub fn new(variant: ModelVariant) -> Self {
        Self {
            variant,
            ..Self::default()
        }
    }

    pub fn with_cleaning(mut self, cleaning: CleaningConfig) -> Self {
        self.cleaning = cleaning;
        self
    }

    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    pub fn with_models_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.models_dir = dir.into();
        self
    }

    /// Check internal consistency before a run
    pub fn validate(&self) -> Result<()> {
        self.cleaning.validate()?;
        self.search.validate(self.variant)?;
        if !(self.threshold_fallback_quantile > 0.0 && self.threshold_fallback_quantile < 1.0) {
            return Err(DrytimeError::Config(format!(
                "threshold fallback quantile must be in (0, 1), got {}",
                self.threshold_fallback_quantile
            )));
        }
        Ok(())
    }
}

/// Where uploaded artifacts end up
#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    /// A directory on the local filesystem
    Local { dir: PathBuf },
    /// An Azure Blob Storage container; account and credentials come from `AZURE_*` variables
    Azure { container: String },
    /// Process-local store, used by tests and dry runs
    Memory,
}

/// Service configuration: sensor API, health endpoint, scheduler, storage
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_url: String,
    pub threshold_url: String,
    pub fetch_timeout_secs: u64,
    pub health_host: String,
    pub health_port: u16,
    /// Five-field cron expression, evaluated in local time
    pub schedule_cron: String,
    pub storage: StorageBackend,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_url: "http://localhost:8080/sensor/data".to_string(),
            threshold_url: "http://localhost:8080/sensor/soilhumiditythreshold".to_string(),
            fetch_timeout_secs: 120,
            health_host: "0.0.0.0".to_string(),
            health_port: 8081,
            schedule_cron: "0 0 * * *".to_string(),
            storage: StorageBackend::Local {
                dir: PathBuf::from("./uploaded-models"),
            },
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    ///
    /// Recognized variables: `SENSOR_DATA_URL`, `SENSOR_THRESHOLD_URL`,
    /// `FETCH_TIMEOUT_SECS`, `HEALTH_HOST`, `HEALTH_PORT`, `SCHEDULE_CRON`,
    /// `MODELS_DIR`, `MODEL_VARIANT`, `STORAGE_BACKEND` (`local`, `azure`,
    /// `memory`), `STORAGE_LOCAL_DIR`, `AZURE_STORAGE_CONTAINER`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a variable is present but malformed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SENSOR_DATA_URL") {
            config.data_url = url;
        }
        if let Ok(url) = std::env::var("SENSOR_THRESHOLD_URL") {
            config.threshold_url = url;
        }
        if let Ok(secs) = std::env::var("FETCH_TIMEOUT_SECS") {
            config.fetch_timeout_secs = parse_env("FETCH_TIMEOUT_SECS", &secs)?;
        }
        if let Ok(host) = std::env::var("HEALTH_HOST") {
            config.health_host = host;
        }
        if let Ok(port) = std::env::var("HEALTH_PORT") {
            config.health_port = parse_env("HEALTH_PORT", &port)?;
        }
        if let Ok(cron) = std::env::var("SCHEDULE_CRON") {
            config.schedule_cron = cron;
        }
        if let Ok(dir) = std::env::var("MODELS_DIR") {
            config.pipeline.models_dir = PathBuf::from(dir);
        }
        if let Ok(variant) = std::env::var("MODEL_VARIANT") {
            config.pipeline.variant = variant.parse()?;
        }

        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
        config.storage = match backend.to_lowercase().as_str() {
            "local" => StorageBackend::Local {
                dir: std::env::var("STORAGE_LOCAL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./uploaded-models")),
            },
            "azure" => StorageBackend::Azure {
                container: std::env::var("AZURE_STORAGE_CONTAINER")
                    .unwrap_or_else(|_| "models".to_string()),
            },
            "memory" => StorageBackend::Memory,
            other => {
                return Err(DrytimeError::Config(format!(
                    "unknown STORAGE_BACKEND '{}'",
                    other
                )))
            }
        };

        config.pipeline.validate()?;
        Ok(config)
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DrytimeError::Config(format!("{} has invalid value '{}'", name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logspace_matches_reference_grid() {
        let alphas = logspace(-4.0, 3.0, 20);
        assert_eq!(alphas.len(), 20);
        assert!((alphas[0] - 1e-4).abs() < 1e-12);
        assert!((alphas[19] - 1e3).abs() < 1e-9);
        for pair in alphas.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_bounds_reject_nan() {
        let band = Bounds::new(0.0, 100.0);
        assert!(band.contains(0.0));
        assert!(band.contains(100.0));
        assert!(!band.contains(100.01));
        assert!(!band.contains(f64::NAN));
    }

    #[test]
    fn test_variant_parsing() {
        assert_eq!("ridge".parse::<ModelVariant>().unwrap(), ModelVariant::Ridge);
        assert_eq!("Random-Forest".parse::<ModelVariant>().unwrap(), ModelVariant::RandomForest);
        assert!("svm".parse::<ModelVariant>().is_err());
    }

    #[test]
    fn test_default_pipeline_config_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
        assert!(PipelineConfig::new(ModelVariant::RandomForest).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_single_split() {
        let config = PipelineConfig::default()
            .with_search(SearchConfig::default().with_n_splits(1));
        assert!(matches!(config.validate(), Err(DrytimeError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let config = PipelineConfig::default()
            .with_cleaning(CleaningConfig::default().with_temperature(Bounds::new(50.0, 0.0)));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.health_port, 8081);
        assert_eq!(config.schedule_cron, "0 0 * * *");
        assert_eq!(config.fetch_timeout_secs, 120);
    }
}
