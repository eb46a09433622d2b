//! On-disk store for generated images.
//!
//! Files live directly under the images directory and are named
//! `<token>_<YYYYMMDDHHMMSS>.png`, where the token is a random UUIDv4 in
//! simple form. No index is kept; the directory listing is the source of
//! truth.

use std::path::{Path, PathBuf};

use imagen_relay_common::error::StoreError;
use tracing::{debug, info, warn};

/// Extension for every stored artifact.
pub const ARTIFACT_EXTENSION: &str = "png";

/// Generate a fresh artifact file name.
pub fn artifact_name() -> String {
    format!(
        "{}_{}.{}",
        uuid::Uuid::new_v4().simple(),
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        ARTIFACT_EXTENSION
    )
}

/// Store for persisted image artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    images_dir: PathBuf,
}

impl ArtifactStore {
    /// Create a store rooted at `images_dir`. The directory is not created.
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
        }
    }

    /// Directory holding the artifacts.
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Write each payload to a new artifact and return the file names in order.
    ///
    /// The batch is all-or-nothing: if a write fails, files already written by
    /// this call are removed before the error is returned.
    pub async fn persist(&self, payloads: &[Vec<u8>]) -> Result<Vec<String>, StoreError> {
        self.persist_named(payloads, artifact_name).await
    }

    async fn persist_named<N>(&self, payloads: &[Vec<u8>], mut next_name: N) -> Result<Vec<String>, StoreError>
    where
        N: FnMut() -> String,
    {
        let mut written: Vec<String> = Vec::with_capacity(payloads.len());

        for data in payloads {
            let filename = next_name();
            let path = self.images_dir.join(&filename);

            if let Err(source) = tokio::fs::write(&path, data).await {
                self.remove_batch(&written).await;
                return Err(StoreError::Persist { path, source });
            }

            debug!(path = %path.display(), bytes = data.len(), "Saved image");
            written.push(filename);
        }

        info!(count = written.len(), "Persisted images");
        Ok(written)
    }

    async fn remove_batch(&self, filenames: &[String]) {
        for filename in filenames {
            let path = self.images_dir.join(filename);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to roll back partially persisted image");
            }
        }
    }

    /// List the names of regular files directly under the images directory.
    ///
    /// Order follows the filesystem's enumeration order.
    pub async fn list(&self) -> Result<Vec<String>, StoreError> {
        let list_err = |source: std::io::Error| StoreError::List {
            path: self.images_dir.clone(),
            source,
        };

        let mut entries = tokio::fs::read_dir(&self.images_dir).await.map_err(list_err)?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            let file_type = entry.file_type().await.map_err(list_err)?;
            if !file_type.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }

        Ok(names)
    }
}
