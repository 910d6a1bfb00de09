use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use hakatabot_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

const COMMAND: &str = "config";

struct Field {
    key: &'static str,
    env_key: Option<&'static str>,
    value: String,
}

impl Field {
    fn new(key: &'static str, env_key: Option<&'static str>, value: impl Into<String>) -> Self {
        Self { key, env_key, value: value.into() }
    }
}

pub fn run() -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::success(COMMAND, lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let features = config
        .commands
        .features
        .iter()
        .map(|feature| format!("{} -> {}", feature.prefix, feature.state_key))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        Field::new("database.url", Some("HAKATABOT_DATABASE_URL"), &config.database.url),
        Field::new(
            "database.max_connections",
            Some("HAKATABOT_DATABASE_MAX_CONNECTIONS"),
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            Some("HAKATABOT_DATABASE_TIMEOUT_SECS"),
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "database.transaction_max_attempts",
            None,
            config.database.transaction_max_attempts.to_string(),
        ),
        Field::new(
            "slack.signing_secret",
            Some("HAKATABOT_SLACK_SIGNING_SECRET"),
            redact_secret(Some(&config.slack.signing_secret)),
        ),
        Field::new(
            "slack.bot_token",
            Some("HAKATABOT_SLACK_BOT_TOKEN"),
            redact_token(config.slack.bot_token.expose_secret()),
        ),
        Field::new(
            "slack.api_base_url",
            Some("HAKATABOT_SLACK_API_BASE_URL"),
            &config.slack.api_base_url,
        ),
        Field::new(
            "server.bind_address",
            Some("HAKATABOT_SERVER_BIND_ADDRESS"),
            &config.server.bind_address,
        ),
        Field::new("server.port", Some("HAKATABOT_SERVER_PORT"), config.server.port.to_string()),
        Field::new(
            "server.signature_tolerance_secs",
            None,
            config.server.signature_tolerance_secs.to_string(),
        ),
        Field::new("bus.enabled", Some("HAKATABOT_BUS_ENABLED"), config.bus.enabled.to_string()),
        Field::new("bus.endpoint", Some("HAKATABOT_BUS_ENDPOINT"), &config.bus.endpoint),
        Field::new(
            "bus.project_id",
            Some("HAKATABOT_BUS_PROJECT_ID"),
            config.bus.project_id.as_deref().unwrap_or("<unset>"),
        ),
        Field::new("bus.topic", Some("HAKATABOT_BUS_TOPIC"), &config.bus.topic),
        Field::new(
            "bus.access_token",
            Some("HAKATABOT_BUS_ACCESS_TOKEN"),
            redact_secret(config.bus.access_token.as_ref()),
        ),
        Field::new(
            "detector.channel_id",
            Some("HAKATABOT_DETECTOR_CHANNEL_ID"),
            config.detector.channel_id.as_deref().unwrap_or("<unset>"),
        ),
        Field::new(
            "detector.persona_name",
            Some("HAKATABOT_DETECTOR_PERSONA_NAME"),
            &config.detector.persona_name,
        ),
        Field::new("detector.state_key", None, &config.detector.state_key),
        Field::new("commands.features", None, features),
        Field::new("logging.level", Some("HAKATABOT_LOGGING_LEVEL"), &config.logging.level),
        Field::new(
            "logging.format",
            Some("HAKATABOT_LOGGING_FORMAT"),
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("hakatabot.toml"), PathBuf::from("config/hakatabot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: Option<&SecretString>) -> &'static str {
    match secret {
        Some(secret) if !secret.expose_secret().trim().is_empty() => "<redacted>",
        Some(_) => "<empty>",
        None => "<unset>",
    }
}

/// Keeps the token kind (`xoxb`, `xapp`) and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
