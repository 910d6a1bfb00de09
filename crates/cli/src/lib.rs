pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "hakatabot",
    about = "Hakatabot operator CLI",
    long_about = "Apply state-store migrations, inspect redacted configuration, and read stored listener state.",
    after_help = "Examples:\n  hakatabot migrate\n  hakatabot config\n  hakatabot state rinna-signal"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Print a stored state document, or list document keys when none is given")]
    State {
        #[arg(help = "State document key, e.g. `rinna-signal`")]
        key: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::State { key } => commands::state::run(key.as_deref()),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
