use alertd_common::types::ValidationError;
use sea_orm::DbErr;

/// Errors that can occur within the storage layer.
///
/// Each variant maps onto one failure category of the alert API: a request
/// that never reaches the database ([`StorageError::InvalidRequest`]), an
/// owner that cannot be resolved, a failed write (always rolled back), or a
/// failed read.
///
/// # Examples
///
/// ```rust
/// use alertd_storage::error::StorageError;
///
/// let err = StorageError::Conflict {
///     entity: "machine",
///     key: "sensor-01".to_string(),
/// };
/// assert!(err.to_string().contains("sensor-01"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The submitted alert violated the request shape; storage was not touched.
    #[error(transparent)]
    InvalidRequest(#[from] ValidationError),

    /// The owning machine could not be resolved; nothing was written.
    #[error("Storage: owner resolution failed: {0}")]
    OwnerResolutionFailed(#[from] MachineLookupError),

    /// A write inside the alert transaction failed and the transaction was rolled back.
    #[error("Storage: failed to persist {entity}: {source}")]
    Persistence {
        entity: &'static str,
        #[source]
        source: DbErr,
    },

    /// A read query failed.
    #[error("Storage: query failed: {0}")]
    Query(#[source] DbErr),

    /// A uniquely-keyed record already exists.
    #[error("Storage: {entity} already exists ({key})")]
    Conflict { entity: &'static str, key: String },
}

/// Machine lookup failures, kept apart so callers can tell an unknown
/// machine (client error) from an unavailable backend (server error).
#[derive(Debug, thiserror::Error)]
pub enum MachineLookupError {
    #[error("machine {machine_id} does not exist")]
    NotFound { machine_id: i64 },

    #[error("machine lookup unavailable: {0}")]
    Unavailable(#[source] DbErr),
}

impl StorageError {
    pub(crate) fn persistence(entity: &'static str) -> impl FnOnce(DbErr) -> Self {
        move |source| StorageError::Persistence { entity, source }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
