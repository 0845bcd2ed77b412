//! One fetch → train → upload cycle

use std::sync::Arc;
use tracing::{error, info};

use crate::client::SensorClient;
use crate::config::{AppConfig, PipelineConfig};
use crate::error::{DrytimeError, Result};
use crate::pipeline::{PipelineOutcome, TrainingPipeline, TrainingResult};
use crate::storage::ArtifactStore;

/// Ties the sensor client, the training pipeline and the artifact store together
#[derive(Debug, Clone)]
pub struct Service {
    client: SensorClient,
    pipeline: Arc<TrainingPipeline>,
    store: ArtifactStore,
}

impl Service {
    pub fn new(client: SensorClient, pipeline: PipelineConfig, store: ArtifactStore) -> Self {
        Self {
            client,
            pipeline: Arc::new(TrainingPipeline::new(pipeline)),
            store,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self::new(
            SensorClient::from_config(config)?,
            config.pipeline.clone(),
            ArtifactStore::from_backend(&config.storage)?,
        ))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Fetch payloads, train off the async runtime, then upload both artifact files.
    ///
    /// # Errors
    ///
    /// Fetch, schema, fit, export and upload errors all propagate.
    pub async fn run_once(&self) -> Result<TrainingResult> {
        let samples = self.client.fetch_samples().await?;
        let threshold = self.client.fetch_threshold().await?;

        let pipeline = Arc::clone(&self.pipeline);
        let outcome = tokio::task::spawn_blocking(move || pipeline.run(&samples, &threshold))
            .await
            .map_err(|e| DrytimeError::Fit(format!("training task failed: {}", e)))??;

        let result = TrainingResult::from(&outcome);
        let PipelineOutcome::Trained(run) = &outcome else {
            return Ok(result);
        };

        let artifact = &run.artifact;
        self.store
            .upload(&artifact.model_path, &artifact.model_file)
            .await?;
        self.store
            .upload(&artifact.metadata_path, &artifact.metadata_file)
            .await?;
        info!(
            model = %artifact.model_file,
            metadata = %artifact.metadata_file,
            "Model and metadata uploaded"
        );

        Ok(result.with_message("Model and metadata uploaded successfully."))
    }

    /// Run one cycle, logging instead of returning errors
    pub async fn run_logged(&self) -> Option<TrainingResult> {
        match self.run_once().await {
            Ok(result) => {
                info!(message = %result.message, "Training cycle finished");
                Some(result)
            }
            Err(e) => {
                error!(error = %e, "Training cycle failed");
                None
            }
        }
    }
}
