use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::message::{ChatMessage, MessageTs};
use crate::domain::state::WindowState;

/// Value of the `type` attribute attached to every published signal.
pub const SIGNAL_MESSAGE_TYPE: &str = "signal";

/// Body published to the bus when the detector fires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    pub bot_messages: Vec<ChatMessage>,
    pub human_messages: Vec<ChatMessage>,
    /// Seconds of the signal before this one, `0` if none.
    pub last_signal: f64,
}

impl SignalPayload {
    pub fn from_window(state: &WindowState, previous_signal: MessageTs) -> Self {
        Self {
            bot_messages: state.recent_bot_messages.clone(),
            human_messages: state.recent_human_messages.clone(),
            last_signal: previous_signal.as_secs_f64(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("signal payload could not be encoded: {0}")]
    Encode(String),
    #[error("signal transport failed: {0}")]
    Transport(String),
    #[error("bus rejected signal with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[async_trait]
pub trait SignalPublisher: Send + Sync {
    async fn publish(&self, payload: &SignalPayload) -> Result<(), PublishError>;
}

#[derive(Clone, Debug, Default)]
pub struct NoopSignalPublisher;

#[async_trait]
impl SignalPublisher for NoopSignalPublisher {
    async fn publish(&self, _payload: &SignalPayload) -> Result<(), PublishError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySignalPublisher {
    published: Mutex<Vec<SignalPayload>>,
    fail_with: Option<String>,
}

impl InMemorySignalPublisher {
    /// Publisher whose every call fails, for exercising the best-effort path.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self { published: Mutex::new(Vec::new()), fail_with: Some(reason.into()) }
    }

    pub async fn published(&self) -> Vec<SignalPayload> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl SignalPublisher for InMemorySignalPublisher {
    async fn publish(&self, payload: &SignalPayload) -> Result<(), PublishError> {
        if let Some(reason) = &self.fail_with {
            return Err(PublishError::Transport(reason.clone()));
        }
        self.published.lock().await.push(payload.clone());
        Ok(())
    }
}
