//! Artifact upload to object storage

use object_store::azure::MicrosoftAzureBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::StorageBackend;
use crate::error::{DrytimeError, Result};

/// Uploads local files into an object store
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    store: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Builds the store for a configured backend.
    ///
    /// Azure account name and credentials are read from the `AZURE_*` environment variables.
    pub fn from_backend(backend: &StorageBackend) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match backend {
            StorageBackend::Local { dir } => {
                std::fs::create_dir_all(dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(dir)?)
            }
            StorageBackend::Azure { container } => Arc::new(
                MicrosoftAzureBuilder::from_env()
                    .with_container_name(container)
                    .build()?,
            ),
            StorageBackend::Memory => Arc::new(InMemory::new()),
        };
        Ok(Self { store })
    }

    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload the file at `local_path` under `remote_name`, replacing any existing object.
    pub async fn upload(&self, local_path: &Path, remote_name: &str) -> Result<()> {
        let bytes = tokio::fs::read(local_path).await.map_err(|e| {
            DrytimeError::Upload(format!("cannot read {}: {}", local_path.display(), e))
        })?;
        let size = bytes.len();
        self.store
            .put(&ObjectPath::from(remote_name), PutPayload::from(bytes))
            .await?;
        info!(remote = remote_name, bytes = size, "Uploaded artifact");
        Ok(())
    }

    /// Download an object's bytes
    pub async fn download(&self, remote_name: &str) -> Result<Vec<u8>> {
        let result = self.store.get(&ObjectPath::from(remote_name)).await?;
        Ok(result.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_to_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.onnx");
        std::fs::write(&file, b"onnx-bytes").unwrap();

        let store = ArtifactStore::from_backend(&StorageBackend::Memory).unwrap();
        store.upload(&file, "model.onnx").await.unwrap();
        assert_eq!(store.download("model.onnx").await.unwrap(), b"onnx-bytes");
    }

    #[tokio::test]
    async fn test_local_backend_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("meta.json");
        std::fs::write(&source, b"{}").unwrap();
        let target = dir.path().join("uploaded");

        let store = ArtifactStore::from_backend(&StorageBackend::Local { dir: target.clone() })
            .unwrap();
        store.upload(&source, "meta.json").await.unwrap();
        assert_eq!(std::fs::read(target.join("meta.json")).unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_upload_error() {
        let store = ArtifactStore::from_backend(&StorageBackend::Memory).unwrap();
        let err = store
            .upload(Path::new("/nonexistent/model.onnx"), "model.onnx")
            .await
            .unwrap_err();
        assert!(matches!(err, DrytimeError::Upload(_)));
    }
}
