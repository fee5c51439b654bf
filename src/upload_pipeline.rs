use log::{info, warn};
use std::future::Future;
use std::sync::Arc;

use crate::blob_store::{BlobPath, BlobStore};
use crate::error::{SyncError, SyncResult};
use crate::models::Uid;

/// Uploads a binary and only then lets metadata referencing it be committed.
///
/// A commit that fails after a successful upload leaves the blob orphaned.
/// Nothing is deleted here: a concurrent retry of the same capture may
/// already point at that blob. Orphans are logged and collected out of band.
#[derive(Clone)]
pub struct MediaUploadPipeline {
    blobs: Arc<dyn BlobStore>,
}

impl MediaUploadPipeline {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    pub async fn upload(
        &self,
        uid: &Uid,
        label_name: &str,
        file_name: &str,
        binary: Vec<u8>,
    ) -> SyncResult<String> {
        let path = BlobPath::new(uid, label_name, file_name)?;
        if binary.is_empty() {
            return Err(SyncError::Validation(format!("{} has no content", path)));
        }

        let size = binary.len();
        let url = self
            .blobs
            .put(&path, binary)
            .await
            .map_err(SyncError::transfer)?;

        info!("Uploaded {} ({} bytes) to {}", path, size, url);
        Ok(url)
    }

    /// Uploads `binary`, then runs `commit` with the durable URL.
    pub async fn publish<T, F, Fut>(
        &self,
        uid: &Uid,
        label_name: &str,
        file_name: &str,
        binary: Vec<u8>,
        commit: F,
    ) -> SyncResult<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let url = self.upload(uid, label_name, file_name, binary).await?;

        match commit(url.clone()).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("Metadata commit failed, blob left orphaned at {}: {}", url, e);
                Err(e)
            }
        }
    }
}
