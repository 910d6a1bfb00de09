use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::blocks::Block;
use crate::events::Reply;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PostMessageRequest {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
}

impl From<&Reply> for PostMessageRequest {
    fn from(reply: &Reply) -> Self {
        Self {
            channel: reply.channel.clone(),
            text: reply.message.fallback_text.clone(),
            thread_ts: reply.thread_ts.map(|ts| ts.to_string()),
            blocks: reply.message.blocks.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatClientError {
    #[error("chat transport failure: {0}")]
    Transport(String),
    #[error("chat API returned error `{0}`")]
    Api(String),
    #[error("chat API response could not be decoded: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn post_message(&self, request: &PostMessageRequest) -> Result<(), ChatClientError>;
}

#[derive(Deserialize)]
struct SlackApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// `chat.postMessage` over the Slack Web API.
pub struct SlackWebClient {
    client: Client,
    base_url: String,
    bot_token: SecretString,
}

impl SlackWebClient {
    pub fn new(base_url: impl Into<String>, bot_token: SecretString) -> Result<Self, ChatClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| ChatClientError::Transport(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_owned(), bot_token })
    }
}

#[async_trait]
impl ChatClient for SlackWebClient {
    async fn post_message(&self, request: &PostMessageRequest) -> Result<(), ChatClientError> {
        let url = format!("{}/chat.postMessage", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bot_token.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|error| ChatClientError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChatClientError::Transport(format!("HTTP {status}")));
        }

        let body: SlackApiResponse =
            response.json().await.map_err(|error| ChatClientError::Decode(error.to_string()))?;
        if !body.ok {
            return Err(ChatClientError::Api(body.error.unwrap_or_else(|| "unknown_error".to_owned())));
        }

        debug!(
            event_name = "slack.chat.posted",
            channel = %request.channel,
            threaded = request.thread_ts.is_some(),
            "chat message posted"
        );
        Ok(())
    }
}

/// Keeps every posted message for assertions.
#[derive(Default)]
pub struct RecordingChatClient {
    posted: Mutex<Vec<PostMessageRequest>>,
}

impl RecordingChatClient {
    pub async fn posted(&self) -> Vec<PostMessageRequest> {
        self.posted.lock().await.clone()
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn post_message(&self, request: &PostMessageRequest) -> Result<(), ChatClientError> {
        self.posted.lock().await.push(request.clone());
        Ok(())
    }
}
