use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{StoreError, StoreResult};
use crate::models::Uid;

/// Sub-collections of a user partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Collection {
    Profile,
    Label,
    Photos,
    Friends,
    FriendRequests,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Profile => "PROFILE",
            Collection::Label => "LABEL",
            Collection::Photos => "PHOTOS",
            Collection::Friends => "FRIENDS",
            Collection::FriendRequests => "FRIEND_REQUESTS",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    pub partition: Uid,
    pub collection: Collection,
    pub key: String,
}

impl DocumentPath {
    pub fn new(partition: &Uid, collection: Collection, key: impl Into<String>) -> Self {
        Self {
            partition: partition.clone(),
            collection,
            key: key.into(),
        }
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.partition, self.collection, self.key)
    }
}

/// A stored document together with the version the store assigned to its last write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub data: Value,
}

impl Snapshot {
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    Absent,
    Exists,
    Version(u64),
}

impl Precondition {
    pub fn holds(&self, current: Option<&Snapshot>) -> bool {
        match (self, current) {
            (Precondition::Absent, None) => true,
            (Precondition::Exists, Some(_)) => true,
            (Precondition::Version(expected), Some(snapshot)) => snapshot.version == *expected,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(Value),
    Delete,
}

/// Reads and writes over arbitrary documents, in any partitions, that the
/// store commits as one unit or not at all.
///
/// Preconditions record what the caller observed; if any of them no longer
/// holds at commit time the store rejects the whole context with
/// [`StoreError::Conflict`].
#[derive(Debug, Clone, Default)]
pub struct TransactionContext {
    preconditions: Vec<(DocumentPath, Precondition)>,
    mutations: Vec<(DocumentPath, Mutation)>,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(&mut self, path: DocumentPath, precondition: Precondition) -> &mut Self {
        self.preconditions.push((path, precondition));
        self
    }

    /// Requires the document to still be exactly what was read: same version, or still absent.
    pub fn guard(&mut self, path: DocumentPath, observed: Option<&Snapshot>) -> &mut Self {
        let precondition = match observed {
            Some(snapshot) => Precondition::Version(snapshot.version),
            None => Precondition::Absent,
        };
        self.require(path, precondition)
    }

    pub fn set<T: Serialize>(&mut self, path: DocumentPath, data: &T) -> StoreResult<&mut Self> {
        let value = serde_json::to_value(data)?;
        self.mutations.push((path, Mutation::Set(value)));
        Ok(self)
    }

    pub fn delete(&mut self, path: DocumentPath) -> &mut Self {
        self.mutations.push((path, Mutation::Delete));
        self
    }

    pub fn preconditions(&self) -> &[(DocumentPath, Precondition)] {
        &self.preconditions
    }

    pub fn mutations(&self) -> &[(DocumentPath, Mutation)] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.preconditions.is_empty() && self.mutations.is_empty()
    }
}

/// Partitioned document store, one partition per user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> StoreResult<Option<Snapshot>>;

    /// Unconditional upsert.
    async fn set(&self, path: &DocumentPath, data: Value) -> StoreResult<()>;

    /// Deleting an absent document succeeds.
    async fn delete(&self, path: &DocumentPath) -> StoreResult<()>;

    /// Documents of one collection, ordered by key.
    async fn list(
        &self,
        partition: &Uid,
        collection: Collection,
    ) -> StoreResult<Vec<(String, Snapshot)>>;

    /// All-or-nothing over exactly the documents named in `tx`.
    async fn commit(&self, tx: TransactionContext) -> StoreResult<()>;
}

/// Serializes `data` and upserts it.
pub async fn put_document<T: Serialize + Sync>(
    store: &dyn RemoteStore,
    path: &DocumentPath,
    data: &T,
) -> StoreResult<()> {
    let value = serde_json::to_value(data)?;
    store.set(path, value).await
}

pub async fn get_document<T: DeserializeOwned>(
    store: &dyn RemoteStore,
    path: &DocumentPath,
) -> StoreResult<Option<T>> {
    match store.get(path).await? {
        Some(snapshot) => Ok(Some(snapshot.decode()?)),
        None => Ok(None),
    }
}

pub fn conflict(path: &DocumentPath) -> StoreError {
    StoreError::Conflict(path.to_string())
}
