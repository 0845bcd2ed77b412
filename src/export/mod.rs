//! Model export module
//!
//! Provides functionality to export the fitted pipeline:
//! - ONNX protobuf encoding (`ai.onnx.ml` operators)
//! - A reference evaluator for decoded graphs
//! - Timestamped artifact files with a JSON metadata record

pub mod artifact;
pub mod evaluator;
pub mod onnx;
pub mod proto;

pub use artifact::{
    artifact_names, read_metadata, ArtifactBuilder, ModelArtifact, TrainingMetadata, Verification,
};
pub use evaluator::OnnxModel;
pub use onnx::{ONNXConfig, ONNXExportable, ONNXExporter};
