pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod transaction;

pub use connection::{connect, connect_from_config, connect_with_settings, DbPool};
pub use repositories::{
    CommitOutcome, InMemoryStateStore, RepositoryError, SqlStateStore, StateStore, StoredDocument,
};
pub use transaction::{merge_fields, TransactionError, TransactionRunner, TransactionStep};
