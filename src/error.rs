/// Failures reported by the remote document store and the blob store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A transaction precondition no longer holds. Nothing was written.
    #[error("Transaction conflict on {0}")]
    Conflict(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome kinds surfaced by the sync and social-graph engine.
///
/// Callers pick their retry policy per kind, see [`SyncError::is_retryable`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Blob transfer failed: {0}")]
    Transfer(String),
    #[error("Write failed: {0}")]
    Write(String),
    /// A multi-document transaction did not commit. None of its writes took effect.
    #[error("Transaction aborted: {0}")]
    Transaction(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transfer(_) | SyncError::Write(_) | SyncError::Transaction(_)
        )
    }

    pub(crate) fn transfer(err: StoreError) -> Self {
        SyncError::Transfer(err.to_string())
    }

    pub(crate) fn write(err: StoreError) -> Self {
        SyncError::Write(err.to_string())
    }

    pub(crate) fn transaction(err: StoreError) -> Self {
        SyncError::Transaction(err.to_string())
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => SyncError::NotFound("local cache row".to_string()),
            other => SyncError::Write(format!("local cache: {}", other)),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(SyncError::Transfer("quota".into()).is_retryable());
        assert!(SyncError::Write("offline".into()).is_retryable());
        assert!(SyncError::Transaction("conflict".into()).is_retryable());
        assert!(!SyncError::NotFound("request".into()).is_retryable());
        assert!(!SyncError::Validation("uid".into()).is_retryable());
    }

    #[test]
    fn test_sqlx_row_not_found_maps_to_not_found() {
        let err: SyncError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, SyncError::NotFound(_)));

        let err: SyncError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, SyncError::Write(_)));
    }

    #[test]
    fn test_store_error_mapping_keeps_message() {
        let err = SyncError::transaction(StoreError::Conflict("u1/FRIENDS/u2".into()));
        assert_eq!(
            err.to_string(),
            "Transaction aborted: Transaction conflict on u1/FRIENDS/u2"
        );
    }
}
