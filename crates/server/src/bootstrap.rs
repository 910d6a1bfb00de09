use std::sync::Arc;

use axum::Router;
use hakatabot_core::classifier::ClassifierError;
use hakatabot_core::config::{AppConfig, ConfigError, LoadOptions};
use hakatabot_core::signal::{NoopSignalPublisher, PublishError, SignalPublisher};
use hakatabot_core::window::{RandomDraw, ThreadRngDraw};
use hakatabot_db::{connect_from_config, migrations, DbPool, SqlStateStore, TransactionRunner};
use hakatabot_slack::client::{ChatClient, ChatClientError, SlackWebClient};
use hakatabot_slack::detector::SignalDetector;
use hakatabot_slack::events::{EventDispatcher, EventLogger};
use hakatabot_slack::signature::SignatureVerifier;
use hakatabot_slack::state_commands::FeatureCommandHandler;
use thiserror::Error;
use tracing::info;

use crate::health;
use crate::ingress::{self, IngressState};
use crate::publisher::PubSubPublisher;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub dispatcher: Arc<EventDispatcher>,
    pub chat: Arc<dyn ChatClient>,
    pub verifier: Arc<SignatureVerifier>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("detector setup failed: {0}")]
    Detector(#[from] ClassifierError),
    #[error("slack client setup failed: {0}")]
    ChatClient(#[from] ChatClientError),
    #[error("signal bus setup failed: {0}")]
    Publisher(#[from] PublishError),
}

impl Application {
    pub fn router(&self) -> Router {
        let ingress = IngressState {
            dispatcher: self.dispatcher.clone(),
            chat: self.chat.clone(),
            verifier: self.verifier.clone(),
        };
        health::router(self.db_pool.clone(), self.dispatcher.handler_names())
            .merge(ingress::router(ingress))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_from_config(&config.database)
        .await
        .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runner = TransactionRunner::new(Arc::new(SqlStateStore::new(db_pool.clone())))
        .with_max_attempts(config.database.transaction_max_attempts);
    let publisher = signal_publisher(&config)?;
    let dispatcher = build_dispatcher(&config, runner, publisher, Arc::new(ThreadRngDraw))?;
    info!(
        event_name = "system.bootstrap.listeners_registered",
        correlation_id = "bootstrap",
        listeners = ?dispatcher.handler_names(),
        "event listeners registered"
    );

    let chat: Arc<dyn ChatClient> =
        Arc::new(SlackWebClient::new(&config.slack.api_base_url, config.slack.bot_token.clone())?);
    let verifier = Arc::new(SignatureVerifier::new(
        config.slack.signing_secret.clone(),
        config.server.signature_tolerance_secs,
    ));

    Ok(Application { config, db_pool, dispatcher: Arc::new(dispatcher), chat, verifier })
}

fn signal_publisher(config: &AppConfig) -> Result<Arc<dyn SignalPublisher>, BootstrapError> {
    if !config.bus.enabled {
        info!(
            event_name = "system.bootstrap.bus_disabled",
            correlation_id = "bootstrap",
            "signal bus disabled; signals are computed but not published"
        );
        return Ok(Arc::new(NoopSignalPublisher));
    }
    Ok(Arc::new(PubSubPublisher::from_config(&config.bus)?))
}

/// Listener order is the order events are seen in: logger, detector, feature commands.
pub fn build_dispatcher(
    config: &AppConfig,
    runner: TransactionRunner,
    publisher: Arc<dyn SignalPublisher>,
    draw: Arc<dyn RandomDraw>,
) -> Result<EventDispatcher, ClassifierError> {
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(EventLogger);

    if let Some(channel_id) = &config.detector.channel_id {
        dispatcher.register(SignalDetector::new(
            &config.detector,
            channel_id.as_str(),
            runner.clone(),
            publisher,
            draw,
        )?);
    }

    if !config.commands.features.is_empty() {
        dispatcher.register(FeatureCommandHandler::new(config.commands.features.clone(), runner));
    }

    Ok(dispatcher)
}
