//! Store-level error type. Mirrors the propagation policy from the error
//! handling design: configuration errors are fatal, row conflicts are
//! retried by the caller, everything else bubbles as `Database`.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("manifest not found: {0}")]
    ManifestNotFound(Uuid),

    #[error("manifest group not found: {0}")]
    ManifestGroupNotFound(Uuid),

    #[error("metadata not found: {0}")]
    MetadataNotFound(Uuid),

    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(Uuid),

    #[error("work queue entry not found: {0}")]
    WorkQueueEntryNotFound(Uuid),

    #[error("concurrency conflict on {entity}: expected state {expected}, found {actual}")]
    StoreConflict {
        entity: &'static str,
        expected: String,
        actual: String,
    },

    #[error("manifest with external_id `{0}` already depends on a parent that does not exist")]
    MissingParent(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
