use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use super::{CommitOutcome, RepositoryError, StateStore, StoredDocument};
use crate::DbPool;

pub struct SqlStateStore {
    pool: DbPool,
}

impl SqlStateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<StoredDocument, RepositoryError> {
    let body: String = row.try_get("body").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let body = serde_json::from_str::<Value>(&body)
        .map_err(|e| RepositoryError::Decode(format!("state body is not JSON: {e}")))?;

    Ok(StoredDocument { body, version })
}

#[async_trait::async_trait]
impl StateStore for SqlStateStore {
    async fn load(&self, key: &str) -> Result<Option<StoredDocument>, RepositoryError> {
        let row = sqlx::query("SELECT body, version FROM states WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_document(r)?)),
            None => Ok(None),
        }
    }

    async fn commit(
        &self,
        key: &str,
        expected_version: Option<i64>,
        body: &Value,
    ) -> Result<CommitOutcome, RepositoryError> {
        let body = serde_json::to_string(body).map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let updated_at = Utc::now().to_rfc3339();

        let (result, next_version) = match expected_version {
            None => {
                let result = sqlx::query(
                    "INSERT INTO states (key, body, version, updated_at)
                     VALUES (?, ?, 1, ?)
                     ON CONFLICT(key) DO NOTHING",
                )
                .bind(key)
                .bind(&body)
                .bind(&updated_at)
                .execute(&self.pool)
                .await?;
                (result, 1)
            }
            Some(version) => {
                let result = sqlx::query(
                    "UPDATE states
                     SET body = ?, version = version + 1, updated_at = ?
                     WHERE key = ? AND version = ?",
                )
                .bind(&body)
                .bind(&updated_at)
                .bind(key)
                .bind(version)
                .execute(&self.pool)
                .await?;
                (result, version + 1)
            }
        };

        if result.rows_affected() == 1 {
            Ok(CommitOutcome::Committed { version: next_version })
        } else {
            Ok(CommitOutcome::Conflict)
        }
    }

    async fn keys(&self) -> Result<Vec<String>, RepositoryError> {
        let rows = sqlx::query("SELECT key FROM states ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("key").map_err(|e| RepositoryError::Decode(e.to_string())))
            .collect()
    }
}
