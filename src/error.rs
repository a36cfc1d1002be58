use thiserror::Error;

/// Errors returned by the catalog store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Rejects blank identifiers before they reach the key space.
pub(crate) fn require_id(kind: &'static str, id: &str) -> StoreResult<()> {
    if id.trim().is_empty() {
        return Err(StoreError::Invalid(format!("{kind} id must be non-empty")));
    }
    Ok(())
}
