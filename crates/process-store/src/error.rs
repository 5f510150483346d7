//! Error types shared by the store engine and the stores built on it

use rusqlite::ErrorCode;

/// All errors a store operation can surface.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record that the operation requires does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The host cannot provide persistent storage (missing directory
    /// permissions, exhausted disk, unreadable file).
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The handle is closed, or another connection holds the database
    /// (a pending schema upgrade, a long write lock).
    #[error("storage blocked: {0}")]
    StorageBlocked(String),

    /// A document or parsed value was rejected before reaching the store.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// The record has no usable value at the collection's primary key path.
    #[error("record for collection {collection} has no key at path {key_path}")]
    MissingKey { collection: String, key_path: String },

    /// A collection or index declaration the engine cannot honour.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure (SQL error, worker task failure).
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    /// Conditions the application should present to the user as
    /// retryable instead of treating as a crash.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::StorageBlocked(_) | Self::StorageUnavailable(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                Self::StorageBlocked(err.to_string())
            }
            Some(ErrorCode::CannotOpen)
            | Some(ErrorCode::DiskFull)
            | Some(ErrorCode::ReadOnly)
            | Some(ErrorCode::PermissionDenied)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::DatabaseCorrupt)
            | Some(ErrorCode::SystemIoFailure) => Self::StorageUnavailable(err.to_string()),
            _ => Self::Backend(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_maps_to_blocked() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_BUSY));
        assert!(matches!(err, StoreError::StorageBlocked(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_full_disk_maps_to_unavailable() {
        let err = StoreError::from(sqlite_failure(rusqlite::ffi::SQLITE_FULL));
        assert!(matches!(err, StoreError::StorageUnavailable(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_other_failures_map_to_backend() {
        let err = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!err.is_recoverable());
    }
}
