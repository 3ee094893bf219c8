use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::models::job::Artifact;
use crate::services::cancel::CancelToken;
use crate::services::comfy::{RenderService, ServiceError};

/// Downloads artifacts and commits them under a local directory.
///
/// Files keep the exact name the service assigned: whatever later serves
/// them resolves by that name.
#[derive(Clone)]
pub struct ArtifactStore {
    service: Arc<dyn RenderService>,
    output_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(service: Arc<dyn RenderService>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Download `artifact_name` and write it to `<output_dir>/<artifact_name>`.
    pub async fn fetch_and_save(
        &self,
        cancel: &CancelToken,
        artifact_name: &str,
    ) -> Result<PathBuf, StoreError> {
        let artifact = self.fetch(cancel, artifact_name).await?;
        self.save(artifact).await
    }

    pub async fn fetch(&self, cancel: &CancelToken, artifact_name: &str) -> Result<Artifact, StoreError> {
        check_name(artifact_name)?;
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StoreError::Cancelled),
            bytes = self.service.view(artifact_name) => bytes.map_err(StoreError::Download)?,
        };
        tracing::debug!(filename = %artifact_name, size = bytes.len(), "Artifact downloaded");

        Ok(Artifact {
            name: artifact_name.to_string(),
            bytes,
        })
    }

    /// Write through a temporary file in the target directory, then rename
    /// it over the final path. A failed write leaves nothing behind.
    pub async fn save(&self, artifact: Artifact) -> Result<PathBuf, StoreError> {
        check_name(&artifact.name)?;
        let dir = self.output_dir.clone();

        let path = tokio::task::spawn_blocking(move || -> Result<PathBuf, std::io::Error> {
            std::fs::create_dir_all(&dir)?;
            let destination = dir.join(&artifact.name);

            let mut partial = tempfile::Builder::new()
                .prefix(".partial-")
                .tempfile_in(&dir)?;
            partial.write_all(&artifact.bytes)?;
            partial.as_file().sync_all()?;
            partial.persist(&destination).map_err(|e| e.error)?;

            Ok(destination)
        })
        .await??;

        tracing::info!(path = %path.display(), "Artifact saved");
        Ok(path)
    }
}

/// The service name is used verbatim, but it must be a single plain path
/// component so it cannot escape the output directory.
fn check_name(name: &str) -> Result<(), StoreError> {
    let plain = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name);
    if plain {
        Ok(())
    } else {
        Err(StoreError::UnsafeName(name.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Artifact download failed: {0}")]
    Download(#[source] ServiceError),

    #[error("Artifact name is not a plain file name: {0:?}")]
    UnsafeName(String),

    #[error("Cancelled while downloading the artifact")]
    Cancelled,

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact writer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
