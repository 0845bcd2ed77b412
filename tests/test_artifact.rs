//! Integration tests for artifact export: ONNX encoding, decoding and metadata

use chrono::{TimeZone, Utc};
use drytime::config::{ModelVariant, SearchConfig};
use drytime::export::{read_metadata, ArtifactBuilder, OnnxModel, TrainingMetadata};
use drytime::features::{ThresholdAdjustment, FEATURE_NAMES};
use drytime::training::{GridSearch, Hyperparameters};
use ndarray::{Array1, Array2};
use ort::session::Session;
use ort::value::Tensor;

fn training_data(n: usize) -> (Array2<f64>, Array1<f64>) {
    let x = Array2::from_shape_fn((n, 8), |(i, j)| match j {
        0 => 60.0 - (i % 40) as f64,
        1 => -1.0,
        2 => 50.0 + (i % 3) as f64,
        3 => 20.0 + (i % 5) as f64 * 0.5,
        4 => 100.0 + (i * 7 % 50) as f64,
        5 => ((i % 24) as f64 / 24.0 * std::f64::consts::TAU).sin(),
        6 => ((i % 24) as f64 / 24.0 * std::f64::consts::TAU).cos(),
        _ => 30.0,
    });
    let y = x.column(0).mapv(|soil| ((soil - 30.0) * 10.0).max(0.0));
    (x, y)
}

/// Score `x` with ONNX Runtime
fn onnxruntime_predict(bytes: &[u8], x: &Array2<f64>) -> Vec<f64> {
    let mut session = Session::builder().unwrap().commit_from_memory(bytes).unwrap();
    let data: Vec<f32> = x.iter().map(|v| *v as f32).collect();
    let input = Tensor::from_array(([x.nrows(), x.ncols()], data)).unwrap();
    let outputs = session.run(ort::inputs!["input" => input]).unwrap();
    let (_, values) = outputs["variable"].try_extract_tensor::<f32>().unwrap();
    let predictions: Vec<f64> = values.iter().map(|v| *v as f64).collect();
    predictions
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-3 * b.abs().max(1.0)
}

fn feature_names() -> Vec<String> {
    FEATURE_NAMES.iter().map(|s| s.to_string()).collect()
}

fn write_artifact(
    variant: ModelVariant,
) -> (
    tempfile::TempDir,
    drytime::export::ModelArtifact,
    Array2<f64>,
    drytime::training::FittedPipeline,
) {
    let (x, y) = training_data(80);
    let search = SearchConfig::default()
        .with_n_splits(3)
        .with_ridge_alphas(vec![0.1, 1.0])
        .with_forest_grid(vec![8], vec![Some(6)]);
    let report = GridSearch::from_config(variant, &search).fit(&x, &y).unwrap();

    let adjustment = ThresholdAdjustment {
        requested: 10.0,
        applied: 30.0,
        min_observed: 21.0,
    };
    let metadata = TrainingMetadata::from_report(
        &report,
        &feature_names(),
        30.0,
        Some(adjustment),
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
    );

    let dir = tempfile::tempdir().unwrap();
    let artifact = ArtifactBuilder::new(dir.path().join("models"))
        .write(&report.pipeline, metadata, &x)
        .unwrap();
    (dir, artifact, x, report.pipeline)
}

#[test]
fn test_ridge_artifact_round_trip() {
    let (_dir, artifact, x, pipeline) = write_artifact(ModelVariant::Ridge);
    assert_eq!(
        artifact.model_file,
        "soil_humidity_baseline_ridge_20250102030405.onnx"
    );
    assert!(artifact.model_path.exists() && artifact.metadata_path.exists());
    assert!(artifact.verification.max_abs_diff < 1e-2);

    let bytes = std::fs::read(&artifact.model_path).unwrap();
    let model = OnnxModel::from_bytes(&bytes).unwrap();
    assert_eq!(model.n_features(), 8);
    assert_eq!(model.predict(&x).unwrap().len(), x.nrows());

    let expected = pipeline.predict(&x).unwrap();
    for (r, b) in onnxruntime_predict(&bytes, &x).iter().zip(expected.iter()) {
        assert!(close(*r, *b), "onnxruntime {} vs {}", r, b);
    }
    assert_eq!(
        model.metadata().get("feature_names").map(String::as_str),
        Some(FEATURE_NAMES.join(",").as_str())
    );
    assert_eq!(model.metadata().get("threshold").map(String::as_str), Some("30"));
}

#[test]
fn test_forest_artifact_round_trip() {
    let (_dir, artifact, x, pipeline) = write_artifact(ModelVariant::RandomForest);
    assert!(artifact.model_file.starts_with("soil_humidity_randomforest_"));
    assert!(artifact.verification.max_abs_diff < 1e-2);

    // every row, in-bag or not, must take the same branches in the runtime
    let bytes = std::fs::read(&artifact.model_path).unwrap();
    let expected = pipeline.predict(&x).unwrap();
    let runtime = onnxruntime_predict(&bytes, &x);
    assert_eq!(runtime.len(), x.nrows());
    for (r, b) in runtime.iter().zip(expected.iter()) {
        assert!(close(*r, *b), "onnxruntime {} vs {}", r, b);
    }

    let metadata = read_metadata(&artifact.metadata_path).unwrap();
    assert_eq!(
        metadata.hyperparameters,
        Hyperparameters::Forest {
            n_estimators: 8,
            max_depth: Some(6)
        }
    );
    assert_eq!(metadata.cross_val_splits, 3);
    assert_eq!(metadata.threshold_adjustment.unwrap().requested, 10.0);
    assert_eq!(metadata, artifact.metadata);
}

#[test]
fn test_metadata_record_keys() {
    let (_dir, artifact, _, _) = write_artifact(ModelVariant::Ridge);
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&artifact.metadata_path).unwrap()).unwrap();

    for key in [
        "model_type",
        "target",
        "feature_names",
        "alpha",
        "cross_val_splits",
        "training_timestamp_utc",
        "rmse_cv",
        "r2_insample",
        "threshold",
        "threshold_adjustment",
        "n_training_rows",
    ] {
        assert!(raw.get(key).is_some(), "missing {}", key);
    }
    assert_eq!(raw["target"], "minutes_to_dry (<30% soil humidity)");
    assert_eq!(raw["training_timestamp_utc"], "2025-01-02T03:04:05Z");
}
