use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{StoreError, StoreResult};
use crate::models::Uid;
use crate::remote_store::{
    conflict, Collection, DocumentPath, Mutation, RemoteStore, Snapshot, TransactionContext,
};

/// Rejects every write that touches a matching document. `None` matches anything.
#[derive(Debug, Clone)]
struct FailureRule {
    partition: Option<Uid>,
    collection: Option<Collection>,
}

impl FailureRule {
    fn matches(&self, path: &DocumentPath) -> bool {
        self.partition
            .as_ref()
            .map_or(true, |p| *p == path.partition)
            && self.collection.map_or(true, |c| c == path.collection)
    }
}

#[derive(Default)]
struct Inner {
    documents: HashMap<DocumentPath, Snapshot>,
    next_version: u64,
    failures: Vec<FailureRule>,
}

impl Inner {
    fn check_writable(&self, path: &DocumentPath) -> StoreResult<()> {
        if self.failures.iter().any(|rule| rule.matches(path)) {
            return Err(StoreError::Unavailable(format!("write to {} rejected", path)));
        }
        Ok(())
    }

    fn apply(&mut self, path: &DocumentPath, mutation: Mutation) {
        match mutation {
            Mutation::Set(data) => {
                self.next_version += 1;
                let version = self.next_version;
                self.documents
                    .insert(path.clone(), Snapshot { version, data });
            }
            Mutation::Delete => {
                self.documents.remove(path);
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    partition: Uid,
    collection: Collection,
    key: String,
    version: u64,
    data: Value,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    next_version: u64,
    documents: Vec<StoredDocument>,
}

/// In-process [`RemoteStore`] with optional JSON snapshot persistence.
///
/// Commits run under one lock, which makes every transaction atomic and
/// serializable. Failure rules let callers simulate an unreachable partition
/// or collection.
#[derive(Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<Inner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("remote store lock poisoned".to_string()))
    }

    /// Fails every subsequent write into `partition` until [`Self::clear_failures`].
    pub fn fail_partition(&self, partition: &Uid) -> StoreResult<()> {
        self.lock()?.failures.push(FailureRule {
            partition: Some(partition.clone()),
            collection: None,
        });
        Ok(())
    }

    /// Fails every subsequent write into `collection` of any partition.
    pub fn fail_collection(&self, collection: Collection) -> StoreResult<()> {
        self.lock()?.failures.push(FailureRule {
            partition: None,
            collection: Some(collection),
        });
        Ok(())
    }

    pub fn clear_failures(&self) -> StoreResult<()> {
        self.lock()?.failures.clear();
        Ok(())
    }

    /// Loads a snapshot written by [`Self::save`]. A missing file yields an empty store.
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No remote snapshot at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let file: StoreFile = serde_json::from_slice(&bytes)?;
        let mut inner = Inner {
            next_version: file.next_version,
            ..Inner::default()
        };
        for doc in file.documents {
            let path = DocumentPath::new(&doc.partition, doc.collection, doc.key);
            inner.documents.insert(
                path,
                Snapshot {
                    version: doc.version,
                    data: doc.data,
                },
            );
        }

        info!(
            "Loaded {} remote documents from {}",
            inner.documents.len(),
            path.display()
        );
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let file = {
            let inner = self.lock()?;
            let mut documents: Vec<StoredDocument> = inner
                .documents
                .iter()
                .map(|(path, snapshot)| StoredDocument {
                    partition: path.partition.clone(),
                    collection: path.collection,
                    key: path.key.clone(),
                    version: snapshot.version,
                    data: snapshot.data.clone(),
                })
                .collect();
            documents.sort_by(|a, b| {
                (&a.partition, a.collection, &a.key).cmp(&(&b.partition, b.collection, &b.key))
            });
            StoreFile {
                next_version: inner.next_version,
                documents,
            }
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(&file)?).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        debug!(
            "Saved {} remote documents to {}",
            file.documents.len(),
            path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Snapshot>> {
        Ok(self.lock()?.documents.get(path).cloned())
    }

    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.check_writable(path)?;
        inner.apply(path, Mutation::Set(data));
        Ok(())
    }

    async fn delete(&self, path: &DocumentPath) -> StoreResult<()> {
        let mut inner = self.lock()?;
        inner.check_writable(path)?;
        inner.apply(path, Mutation::Delete);
        Ok(())
    }

    async fn list(
        &self,
        partition: &Uid,
        collection: Collection,
    ) -> StoreResult<Vec<(String, Snapshot)>> {
        let inner = self.lock()?;
        let mut documents: Vec<(String, Snapshot)> = inner
            .documents
            .iter()
            .filter(|(path, _)| path.partition == *partition && path.collection == collection)
            .map(|(path, snapshot)| (path.key.clone(), snapshot.clone()))
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }

    async fn commit(&self, tx: TransactionContext) -> StoreResult<()> {
        let mut inner = self.lock()?;

        // Validate everything before touching anything.
        for (path, _) in tx.mutations() {
            inner.check_writable(path)?;
        }
        for (path, precondition) in tx.preconditions() {
            if !precondition.holds(inner.documents.get(path)) {
                warn!("Precondition {:?} failed on {}", precondition, path);
                return Err(conflict(path));
            }
        }

        for (path, mutation) in tx.mutations() {
            inner.apply(path, mutation.clone());
        }
        debug!("Committed transaction with {} mutations", tx.mutations().len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_store::Precondition;
    use serde_json::json;
    use tempfile::TempDir;

    fn uid(value: &str) -> Uid {
        Uid::parse(value).unwrap()
    }

    fn friend_path(owner: &str, other: &str) -> DocumentPath {
        DocumentPath::new(&uid(owner), Collection::Friends, other)
    }

    #[tokio::test]
    async fn test_set_assigns_increasing_versions() {
        let store = MemoryRemoteStore::new();
        let path = friend_path("alice", "bob");

        store.set(&path, json!({"n": 1})).await.unwrap();
        let first = store.get(&path).await.unwrap().unwrap();
        store.set(&path, json!({"n": 2})).await.unwrap();
        let second = store.get(&path).await.unwrap().unwrap();

        assert!(second.version > first.version);
        assert_eq!(second.data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_commit_with_failed_precondition_has_no_effect() {
        let store = MemoryRemoteStore::new();
        let existing = friend_path("alice", "bob");
        store.set(&existing, json!({})).await.unwrap();

        let mut tx = TransactionContext::new();
        tx.require(existing.clone(), Precondition::Absent);
        tx.set(friend_path("bob", "alice"), &json!({})).unwrap();

        let result = store.commit(tx).await;
        assert!(matches!(result, Err(StoreError::Conflict(_))));
        assert!(store.get(&friend_path("bob", "alice")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_touching_failed_partition_writes_nothing() {
        let store = MemoryRemoteStore::new();
        store.fail_partition(&uid("bob")).unwrap();

        let mut tx = TransactionContext::new();
        tx.set(friend_path("alice", "bob"), &json!({})).unwrap();
        tx.set(friend_path("bob", "alice"), &json!({})).unwrap();

        assert!(matches!(
            store.commit(tx).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.get(&friend_path("alice", "bob")).await.unwrap().is_none());

        store.clear_failures().unwrap();
        store.set(&friend_path("bob", "alice"), json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_sorted() {
        let store = MemoryRemoteStore::new();
        store.set(&friend_path("alice", "carol"), json!({})).await.unwrap();
        store.set(&friend_path("alice", "bob"), json!({})).await.unwrap();
        store.set(&friend_path("bob", "alice"), json!({})).await.unwrap();

        let keys: Vec<String> = store
            .list(&uid("alice"), Collection::Friends)
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[tokio::test]
    async fn test_snapshot_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("remote/state.json");

        let store = MemoryRemoteStore::new();
        store
            .set(&friend_path("alice", "bob"), json!({"addedAt": "2024-01-01T00:00:00Z"}))
            .await
            .unwrap();
        store.save(&file).await.unwrap();

        let restored = MemoryRemoteStore::load(&file).await.unwrap();
        let snapshot = restored.get(&friend_path("alice", "bob")).await.unwrap().unwrap();
        assert_eq!(snapshot.data["addedAt"], "2024-01-01T00:00:00Z");

        // Versions keep increasing after a reload
        restored.set(&friend_path("bob", "alice"), json!({})).await.unwrap();
        let newer = restored.get(&friend_path("bob", "alice")).await.unwrap().unwrap();
        assert!(newer.version > snapshot.version);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryRemoteStore::load(temp_dir.path().join("absent.json"))
            .await
            .unwrap();
        assert!(store
            .list(&uid("alice"), Collection::Friends)
            .await
            .unwrap()
            .is_empty());
    }
}
