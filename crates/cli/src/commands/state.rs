use hakatabot_db::{connect_from_config, SqlStateStore, StateStore};
use serde_json::json;

use crate::commands::{load_config, runtime, CommandResult};

const COMMAND: &str = "state";

/// Prints one stored document with its version, or lists every key when `key` is `None`.
pub fn run(key: Option<&str>) -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let store = SqlStateStore::new(pool.clone());

        let message = match key {
            Some(key) => {
                let document = store
                    .load(key)
                    .await
                    .map_err(|error| ("state_read", error.to_string(), 5u8))?
                    .ok_or_else(|| ("not_found", format!("no state document `{key}`"), 6u8))?;
                json!({ "key": key, "version": document.version, "body": document.body })
                    .to_string()
            }
            None => {
                let keys =
                    store.keys().await.map_err(|error| ("state_read", error.to_string(), 5u8))?;
                if keys.is_empty() {
                    "no state documents".to_string()
                } else {
                    keys.join("\n")
                }
            }
        };

        pool.close().await;
        Ok::<String, (&'static str, String, u8)>(message)
    });

    match result {
        Ok(message) => CommandResult::success(COMMAND, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}
