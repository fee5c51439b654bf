use log::{debug, info, warn};
use std::sync::Arc;

use crate::error::{StoreError, SyncError, SyncResult};
use crate::models::{
    capture_instant, Friend, FriendDocument, FriendRequest, FriendRequestDocument, ProfileDocument,
    RelationshipState, RequestStatus, Uid,
};
use crate::remote_store::{
    Collection, DocumentPath, Precondition, RemoteStore, Snapshot, TransactionContext,
};

pub const DEFAULT_TRANSACTION_ATTEMPTS: u32 = 5;

const DEFAULT_DISPLAY_NAME: &str = "NoName User";

/// Friend-request lifecycle over mirrored documents in two user partitions.
///
/// Every transition is one [`TransactionContext`] guarded by the versions it
/// read, so the two partitions only ever move together. When another
/// transition commits first the loser re-reads and decides again, up to
/// `max_attempts` times.
pub struct SocialGraph {
    remote: Arc<dyn RemoteStore>,
    max_attempts: u32,
}

enum Attempt<T> {
    Done(T),
    Retry,
}

fn request_path(owner: &Uid, other: &Uid) -> DocumentPath {
    DocumentPath::new(owner, Collection::FriendRequests, other.as_str())
}

fn friend_path(owner: &Uid, other: &Uid) -> DocumentPath {
    DocumentPath::new(owner, Collection::Friends, other.as_str())
}

fn profile_path(uid: &Uid) -> DocumentPath {
    DocumentPath::new(uid, Collection::Profile, uid.as_str())
}

fn validate_pair(uid: &Uid, target: &Uid) -> SyncResult<()> {
    if uid == target {
        return Err(SyncError::Validation(format!(
            "{} cannot befriend themselves",
            uid
        )));
    }
    Ok(())
}

impl SocialGraph {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_max_attempts(remote, DEFAULT_TRANSACTION_ATTEMPTS)
    }

    pub fn with_max_attempts(remote: Arc<dyn RemoteStore>, max_attempts: u32) -> Self {
        Self {
            remote,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn read(&self, path: &DocumentPath) -> SyncResult<Option<Snapshot>> {
        self.remote.get(path).await.map_err(SyncError::transaction)
    }

    /// Commits `tx`. A precondition conflict is reported as a retry, anything
    /// else aborts the operation.
    async fn try_commit(&self, tx: TransactionContext) -> SyncResult<Attempt<()>> {
        match self.remote.commit(tx).await {
            Ok(()) => Ok(Attempt::Done(())),
            Err(StoreError::Conflict(path)) => {
                debug!("Concurrent change on {}, re-reading", path);
                Ok(Attempt::Retry)
            }
            Err(e) => Err(SyncError::transaction(e)),
        }
    }

    fn exhausted(&self, operation: &str, uid: &Uid, target: &Uid) -> SyncError {
        warn!(
            "{} {} -> {} gave up after {} conflicting attempts",
            operation, uid, target, self.max_attempts
        );
        SyncError::Transaction(format!(
            "{} {} -> {} kept conflicting after {} attempts",
            operation, uid, target, self.max_attempts
        ))
    }

    /// Writes `uid -> target` as sent and `target -> uid` as received, with one timestamp.
    ///
    /// Re-sending overwrites both mirrors. Fails with `Validation` when the
    /// two users are already friends.
    pub async fn send_friend_request(&self, uid: &Uid, target: &Uid) -> SyncResult<()> {
        validate_pair(uid, target)?;

        for _ in 0..self.max_attempts {
            if let Attempt::Done(()) = self.try_send(uid, target).await? {
                info!("Friend request sent: {} -> {}", uid, target);
                return Ok(());
            }
        }
        Err(self.exhausted("send", uid, target))
    }

    async fn try_send(&self, uid: &Uid, target: &Uid) -> SyncResult<Attempt<()>> {
        let ours = self.read(&friend_path(uid, target)).await?;
        let theirs = self.read(&friend_path(target, uid)).await?;
        if ours.is_some() || theirs.is_some() {
            return Err(SyncError::Validation(format!(
                "{} and {} are already friends",
                uid, target
            )));
        }

        let requested_at = capture_instant();
        let sent = FriendRequestDocument {
            requested_at,
            status: RequestStatus::Sent,
        };
        let received = FriendRequestDocument {
            requested_at,
            status: RequestStatus::Received,
        };

        let mut tx = TransactionContext::new();
        tx.require(friend_path(uid, target), Precondition::Absent)
            .require(friend_path(target, uid), Precondition::Absent);
        tx.set(request_path(uid, target), &sent)
            .and_then(|tx| tx.set(request_path(target, uid), &received))
            .map_err(SyncError::transaction)?;

        self.try_commit(tx).await
    }

    /// Replaces the pending request pair with a friend pair in one commit.
    ///
    /// Accepting a pair that is already friends is a no-op. Fails with
    /// `NotFound` when there is neither a request nor a friendship.
    pub async fn accept_friend_request(&self, uid: &Uid, target: &Uid) -> SyncResult<()> {
        validate_pair(uid, target)?;

        for _ in 0..self.max_attempts {
            if let Attempt::Done(()) = self.try_accept(uid, target).await? {
                return Ok(());
            }
        }
        Err(self.exhausted("accept", uid, target))
    }

    async fn try_accept(&self, uid: &Uid, target: &Uid) -> SyncResult<Attempt<()>> {
        let ours = self.read(&request_path(uid, target)).await?;
        let theirs = self.read(&request_path(target, uid)).await?;

        if ours.is_none() && theirs.is_none() {
            return match self.read(&friend_path(uid, target)).await? {
                Some(_) => {
                    debug!("{} and {} are already friends", uid, target);
                    Ok(Attempt::Done(()))
                }
                None => Err(SyncError::NotFound(format!(
                    "friend request between {} and {}",
                    uid, target
                ))),
            };
        }
        if ours.is_none() || theirs.is_none() {
            warn!(
                "Friend request {} <-> {} is missing one mirror, accepting anyway",
                uid, target
            );
        }

        let friend = FriendDocument {
            added_at: capture_instant(),
        };

        let mut tx = TransactionContext::new();
        tx.guard(request_path(uid, target), ours.as_ref())
            .guard(request_path(target, uid), theirs.as_ref());
        tx.set(friend_path(uid, target), &friend)
            .and_then(|tx| tx.set(friend_path(target, uid), &friend))
            .map_err(SyncError::transaction)?;
        tx.delete(request_path(uid, target))
            .delete(request_path(target, uid));

        let attempt = self.try_commit(tx).await?;
        if let Attempt::Done(()) = attempt {
            info!("Friend request accepted: {} <-> {}", uid, target);
        }
        Ok(attempt)
    }

    /// Deletes the pending request pair. Friend documents are not touched.
    ///
    /// Rejecting a request that no longer exists succeeds.
    pub async fn reject_friend_request(&self, uid: &Uid, target: &Uid) -> SyncResult<()> {
        validate_pair(uid, target)?;

        for _ in 0..self.max_attempts {
            if let Attempt::Done(()) = self.try_reject(uid, target).await? {
                return Ok(());
            }
        }
        Err(self.exhausted("reject", uid, target))
    }

    async fn try_reject(&self, uid: &Uid, target: &Uid) -> SyncResult<Attempt<()>> {
        let ours = self.read(&request_path(uid, target)).await?;
        let theirs = self.read(&request_path(target, uid)).await?;

        if ours.is_none() && theirs.is_none() {
            debug!("No pending request between {} and {}", uid, target);
            return Ok(Attempt::Done(()));
        }

        let mut tx = TransactionContext::new();
        tx.guard(request_path(uid, target), ours.as_ref())
            .guard(request_path(target, uid), theirs.as_ref())
            .delete(request_path(uid, target))
            .delete(request_path(target, uid));

        let attempt = self.try_commit(tx).await?;
        if let Attempt::Done(()) = attempt {
            info!("Friend request rejected: {} <-> {}", uid, target);
        }
        Ok(attempt)
    }

    /// Creates the profile document if the user has none. Returns whether it was created.
    pub async fn ensure_user(
        &self,
        uid: &Uid,
        display_name: Option<&str>,
        email: &str,
        photo_url: Option<&str>,
    ) -> SyncResult<bool> {
        let profile = ProfileDocument {
            display_name: display_name.unwrap_or(DEFAULT_DISPLAY_NAME).to_string(),
            email: email.to_string(),
            photo_url: photo_url.unwrap_or_default().to_string(),
        };

        let mut tx = TransactionContext::new();
        tx.require(profile_path(uid), Precondition::Absent);
        tx.set(profile_path(uid), &profile)
            .map_err(SyncError::transaction)?;

        match self.try_commit(tx).await? {
            Attempt::Done(()) => {
                info!("Created profile for {}", uid);
                Ok(true)
            }
            Attempt::Retry => Ok(false),
        }
    }

    pub async fn profile(&self, uid: &Uid) -> SyncResult<Option<ProfileDocument>> {
        match self.read(&profile_path(uid)).await? {
            Some(snapshot) => Ok(Some(snapshot.decode().map_err(SyncError::transaction)?)),
            None => Ok(None),
        }
    }

    pub async fn friends(&self, uid: &Uid) -> SyncResult<Vec<Friend>> {
        let documents = self
            .remote
            .list(uid, Collection::Friends)
            .await
            .map_err(SyncError::transaction)?;

        documents
            .into_iter()
            .map(|(key, snapshot)| {
                let doc: FriendDocument = snapshot.decode().map_err(SyncError::transaction)?;
                Ok(Friend {
                    owner: uid.clone(),
                    target: Uid::parse(key)?,
                    added_at: doc.added_at,
                })
            })
            .collect()
    }

    pub async fn friend_requests(&self, uid: &Uid) -> SyncResult<Vec<FriendRequest>> {
        let documents = self
            .remote
            .list(uid, Collection::FriendRequests)
            .await
            .map_err(SyncError::transaction)?;

        documents
            .into_iter()
            .map(|(key, snapshot)| {
                let doc: FriendRequestDocument =
                    snapshot.decode().map_err(SyncError::transaction)?;
                Ok(FriendRequest {
                    owner: uid.clone(),
                    target: Uid::parse(key)?,
                    requested_at: doc.requested_at,
                    status: doc.status,
                })
            })
            .collect()
    }

    /// The pair as seen from `uid`'s partition.
    pub async fn relationship(&self, uid: &Uid, target: &Uid) -> SyncResult<RelationshipState> {
        if self.read(&friend_path(uid, target)).await?.is_some() {
            return Ok(RelationshipState::Friends);
        }

        match self.read(&request_path(uid, target)).await? {
            Some(snapshot) => {
                let doc: FriendRequestDocument =
                    snapshot.decode().map_err(SyncError::transaction)?;
                Ok(match doc.status {
                    RequestStatus::Sent => RelationshipState::RequestSent,
                    RequestStatus::Received => RelationshipState::RequestReceived,
                })
            }
            None => Ok(RelationshipState::None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::MemoryRemoteStore;

    fn uid(value: &str) -> Uid {
        Uid::parse(value).unwrap()
    }

    fn create_test_graph() -> (SocialGraph, Arc<MemoryRemoteStore>) {
        let store = Arc::new(MemoryRemoteStore::new());
        (SocialGraph::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_send_to_self_is_rejected() {
        let (graph, _store) = create_test_graph();
        let result = graph.send_friend_request(&uid("alice"), &uid("alice")).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_relationship_follows_transitions() {
        let (graph, _store) = create_test_graph();
        let (alice, bob) = (uid("alice"), uid("bob"));

        assert_eq!(
            graph.relationship(&alice, &bob).await.unwrap(),
            RelationshipState::None
        );

        graph.send_friend_request(&alice, &bob).await.unwrap();
        assert_eq!(
            graph.relationship(&alice, &bob).await.unwrap(),
            RelationshipState::RequestSent
        );
        assert_eq!(
            graph.relationship(&bob, &alice).await.unwrap(),
            RelationshipState::RequestReceived
        );

        graph.accept_friend_request(&bob, &alice).await.unwrap();
        assert_eq!(
            graph.relationship(&alice, &bob).await.unwrap(),
            RelationshipState::Friends
        );
        assert_eq!(
            graph.relationship(&bob, &alice).await.unwrap(),
            RelationshipState::Friends
        );
    }

    #[tokio::test]
    async fn test_ensure_user_creates_once() {
        let (graph, _store) = create_test_graph();
        let alice = uid("alice");

        assert!(graph
            .ensure_user(&alice, None, "alice@example.com", None)
            .await
            .unwrap());
        assert!(!graph
            .ensure_user(&alice, Some("Alice"), "other@example.com", None)
            .await
            .unwrap());

        let profile = graph.profile(&alice).await.unwrap().unwrap();
        assert_eq!(profile.display_name, "NoName User");
        assert_eq!(profile.email, "alice@example.com");
        assert_eq!(profile.photo_url, "");
    }

    #[tokio::test]
    async fn test_stale_commit_is_retried_without_effect() {
        let store = Arc::new(MemoryRemoteStore::new());
        let graph = SocialGraph::with_max_attempts(store.clone(), 1);
        let (alice, bob) = (uid("alice"), uid("bob"));

        graph.send_friend_request(&alice, &bob).await.unwrap();
        let attempt = graph.try_accept(&alice, &bob).await.unwrap();
        assert!(matches!(attempt, Attempt::Done(())));

        // A commit built from a stale read must not apply.
        let mut tx = TransactionContext::new();
        tx.require(request_path(&alice, &bob), Precondition::Exists)
            .delete(friend_path(&alice, &bob));
        assert!(matches!(
            graph.try_commit(tx).await.unwrap(),
            Attempt::Retry
        ));
        assert!(store.get(&friend_path(&alice, &bob)).await.unwrap().is_some());
    }
}
