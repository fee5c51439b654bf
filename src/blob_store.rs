use async_trait::async_trait;
use log::debug;
use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::error::{StoreError, StoreResult, SyncResult};
use crate::models::{validate_key, Uid};

/// Location of a binary asset: `{uid}/{labelName}/{fileName}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobPath {
    uid: Uid,
    label: String,
    file_name: String,
}

impl BlobPath {
    pub fn new(uid: &Uid, label: &str, file_name: &str) -> SyncResult<Self> {
        validate_key("label name", label)?;
        validate_key("file name", file_name)?;
        Ok(Self {
            uid: uid.clone(),
            label: label.to_string(),
            file_name: file_name.to_string(),
        })
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.uid, self.label, self.file_name)
    }
}

/// Binary store addressed by path.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `bytes` durably and returns a retrieval URL. Overwrites an existing blob.
    async fn put(&self, path: &BlobPath, bytes: Vec<u8>) -> StoreResult<String>;

    /// Resolves a URL returned by [`BlobStore::put`].
    async fn fetch(&self, url: &str) -> StoreResult<Option<Vec<u8>>>;
}

const MEMORY_URL_PREFIX: &str = "memory://blobs/";

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `put` fail until called again with `false`.
    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &BlobPath, bytes: Vec<u8>) -> StoreResult<String> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("upload of {} rejected", path)));
        }

        let url = format!("{}{}", MEMORY_URL_PREFIX, path);
        self.blobs
            .lock()
            .map_err(|_| StoreError::Unavailable("blob store lock poisoned".to_string()))?
            .insert(url.clone(), bytes);
        Ok(url)
    }

    async fn fetch(&self, url: &str) -> StoreResult<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| StoreError::Unavailable("blob store lock poisoned".to_string()))?;
        Ok(blobs.get(url).cloned())
    }
}

static PARTIAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Blob store on the local filesystem under `root`.
///
/// URLs are absolute, percent-encoded `file://` URLs, so they stay valid
/// regardless of the working directory of whoever resolves them.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates `root` if needed and pins it to its canonical absolute form.
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = root.as_ref().canonicalize()?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, path: &BlobPath) -> PathBuf {
        self.root
            .join(path.uid().as_str())
            .join(path.label())
            .join(path.file_name())
    }

    /// Maps a URL back to a file under `root`. Anything else resolves to `None`.
    fn resolve(&self, url: &str) -> Option<PathBuf> {
        let url = Url::parse(url).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        let file_path = url.to_file_path().ok()?;

        let escapes = file_path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
        if escapes || !file_path.starts_with(&self.root) {
            return None;
        }
        Some(file_path)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &BlobPath, bytes: Vec<u8>) -> StoreResult<String> {
        let target = self.file_path(path);
        let dir = target
            .parent()
            .ok_or_else(|| StoreError::Unavailable(format!("no parent for {}", target.display())))?;
        tokio::fs::create_dir_all(dir).await?;

        // Readers never see a half-written blob: write aside, flush, then rename.
        // Each writer gets its own partial file, so concurrent puts of one path
        // cannot rename each other's data away.
        let seq = PARTIAL_SEQ.fetch_add(1, Ordering::Relaxed);
        let partial = dir.join(format!(
            ".{}.{}-{}.partial",
            path.file_name(),
            std::process::id(),
            seq
        ));
        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        if let Err(e) = tokio::fs::rename(&partial, &target).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }

        let url = Url::from_file_path(&target).map_err(|_| {
            StoreError::Unavailable(format!("{} is not an absolute path", target.display()))
        })?;
        debug!("Stored {} bytes at {}", bytes.len(), target.display());
        Ok(url.to_string())
    }

    async fn fetch(&self, url: &str) -> StoreResult<Option<Vec<u8>>> {
        let Some(file_path) = self.resolve(url) else {
            return Ok(None);
        };

        match tokio::fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
