//! Optimistic read-modify-write over a [`StateStore`] document.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::repositories::{CommitOutcome, RepositoryError, StateStore};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BACKOFF: Duration = Duration::from_millis(20);

/// What the transaction body wants to happen after looking at the current state.
#[derive(Debug)]
pub enum TransactionStep<T, R> {
    Write { state: T, output: R },
    /// Leave the document as it is.
    Skip(R),
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("state document `{key}` could not be decoded: {message}")]
    Decode { key: String, message: String },
    #[error("state document `{key}` could not be encoded: {message}")]
    Encode { key: String, message: String },
    #[error("state document `{key}` is still contended after {attempts} attempts")]
    Contention { key: String, attempts: u32 },
}

#[derive(Clone)]
pub struct TransactionRunner {
    store: Arc<dyn StateStore>,
    max_attempts: u32,
    backoff: Duration,
}

impl TransactionRunner {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store, max_attempts: DEFAULT_MAX_ATTEMPTS, backoff: DEFAULT_BACKOFF }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Runs `body` against the typed view of document `key` until the write
    /// lands without interference.
    ///
    /// `body` may run more than once and must not have side effects beyond its
    /// return value. A missing document is presented as `T::default()`. Fields
    /// of the stored JSON object that `T` does not know about are preserved.
    pub async fn run<T, R, F>(&self, key: &str, mut body: F) -> Result<R, TransactionError>
    where
        T: DeserializeOwned + Serialize + Default + Send,
        R: Send,
        F: FnMut(T) -> TransactionStep<T, R> + Send,
    {
        for attempt in 1..=self.max_attempts {
            let stored = self.store.load(key).await?;
            let (existing, version) = match stored {
                Some(document) => (Some(document.body), Some(document.version)),
                None => (None, None),
            };

            let current = match &existing {
                Some(value) => serde_json::from_value::<T>(value.clone()).map_err(|error| {
                    TransactionError::Decode { key: key.to_owned(), message: error.to_string() }
                })?,
                None => T::default(),
            };

            let (state, output) = match body(current) {
                TransactionStep::Skip(output) => return Ok(output),
                TransactionStep::Write { state, output } => (state, output),
            };

            let update = serde_json::to_value(&state).map_err(|error| TransactionError::Encode {
                key: key.to_owned(),
                message: error.to_string(),
            })?;
            let merged = merge_fields(existing, update);

            match self.store.commit(key, version, &merged).await? {
                CommitOutcome::Committed { version } => {
                    debug!(
                        event_name = "state.transaction.committed",
                        state_key = key,
                        version,
                        attempt,
                        "state document committed"
                    );
                    return Ok(output);
                }
                CommitOutcome::Conflict => {
                    debug!(
                        event_name = "state.transaction.conflict",
                        state_key = key,
                        attempt,
                        "state document changed underneath transaction; retrying"
                    );
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.backoff * attempt).await;
                    }
                }
            }
        }

        warn!(
            event_name = "state.transaction.contention",
            state_key = key,
            attempts = self.max_attempts,
            "giving up on contended state document"
        );
        Err(TransactionError::Contention { key: key.to_owned(), attempts: self.max_attempts })
    }

    /// Typed read outside of any transaction.
    pub async fn read<T>(&self, key: &str) -> Result<T, TransactionError>
    where
        T: DeserializeOwned + Default,
    {
        match self.store.load(key).await? {
            Some(document) => serde_json::from_value(document.body).map_err(|error| {
                TransactionError::Decode { key: key.to_owned(), message: error.to_string() }
            }),
            None => Ok(T::default()),
        }
    }
}

/// Overlays the top-level fields of `update` onto `existing`.
///
/// Non-object values on either side are replaced wholesale.
pub fn merge_fields(existing: Option<Value>, update: Value) -> Value {
    match (existing, update) {
        (Some(Value::Object(mut base)), Value::Object(fields)) => {
            for (field, value) in fields {
                base.insert(field, value);
            }
            Value::Object(base)
        }
        (_, Value::Object(fields)) => Value::Object(fields),
        (_, other) => {
            let mut wrapped = Map::new();
            wrapped.insert("value".to_owned(), other);
            Value::Object(wrapped)
        }
    }
}
