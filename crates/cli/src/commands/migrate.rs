use hakatabot_db::{connect_from_config, migrations};

use crate::commands::{load_config, runtime, CommandResult};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
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
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            COMMAND,
            format!("applied pending migrations to {}", config.database.url),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(COMMAND, error_class, message, exit_code)
        }
    }
}
