use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod state;

pub use memory::InMemoryStateStore;
pub use state::SqlStateStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// A named state document together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
    pub body: Value,
    pub version: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { version: i64 },
    /// Another writer got there first; the caller should re-read and retry.
    Conflict,
}

/// Versioned key-value document store.
///
/// `commit` is a compare-and-swap: `expected_version = None` only succeeds if
/// the key does not exist yet, `Some(v)` only if the stored version is still `v`.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<StoredDocument>, RepositoryError>;

    async fn commit(
        &self,
        key: &str,
        expected_version: Option<i64>,
        body: &Value,
    ) -> Result<CommitOutcome, RepositoryError>;

    async fn keys(&self) -> Result<Vec<String>, RepositoryError>;
}
