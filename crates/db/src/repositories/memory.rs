use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use super::{CommitOutcome, RepositoryError, StateStore, StoredDocument};

#[derive(Default)]
pub struct InMemoryStateStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
    forced_conflicts: AtomicU32,
}

impl InMemoryStateStore {
    /// Makes the next `count` commits report a conflict without writing.
    pub fn force_conflicts(&self, count: u32) {
        self.forced_conflicts.store(count, Ordering::SeqCst);
    }

    pub async fn insert(&self, key: &str, body: Value) {
        let mut documents = self.documents.write().await;
        let version = documents.get(key).map(|document| document.version + 1).unwrap_or(1);
        documents.insert(key.to_owned(), StoredDocument { body, version });
    }

    pub async fn body(&self, key: &str) -> Option<Value> {
        self.documents.read().await.get(key).map(|document| document.body.clone())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| remaining.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<StoredDocument>, RepositoryError> {
        let documents = self.documents.read().await;
        Ok(documents.get(key).cloned())
    }

    async fn commit(
        &self,
        key: &str,
        expected_version: Option<i64>,
        body: &Value,
    ) -> Result<CommitOutcome, RepositoryError> {
        if self.take_forced_conflict() {
            return Ok(CommitOutcome::Conflict);
        }

        let mut documents = self.documents.write().await;
        let current = documents.get(key).map(|document| document.version);
        if current != expected_version {
            return Ok(CommitOutcome::Conflict);
        }

        let version = expected_version.map(|version| version + 1).unwrap_or(1);
        documents.insert(key.to_owned(), StoredDocument { body: body.clone(), version });
        Ok(CommitOutcome::Committed { version })
    }

    async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        let mut keys: Vec<String> = self.documents.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}
