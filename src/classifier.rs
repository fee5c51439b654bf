use async_trait::async_trait;

use crate::error::SyncResult;

/// Image-classification collaborator. Returns one best-guess label name.
///
/// The engine treats the answer as an opaque suggestion and never retries.
#[async_trait]
pub trait LabelClassifier: Send + Sync {
    async fn classify(&self, image: &[u8]) -> SyncResult<String>;
}

/// Classifier that always answers with the same name.
#[derive(Debug, Clone)]
pub struct FixedClassifier(pub String);

#[async_trait]
impl LabelClassifier for FixedClassifier {
    async fn classify(&self, _image: &[u8]) -> SyncResult<String> {
        Ok(self.0.clone())
    }
}
