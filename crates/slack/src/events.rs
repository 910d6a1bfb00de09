use std::sync::Arc;

use async_trait::async_trait;
use hakatabot_core::domain::message::{ChatMessage, MessageOrigin, MessageTs};
use hakatabot_core::errors::DomainError;
use hakatabot_db::TransactionError;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::blocks::MessageTemplate;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(ChatMessage),
    ReactionAdded(ReactionAddedEvent),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    ReactionAdded,
    Unsupported,
}

impl SlackEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ReactionAdded => "reaction_added",
            Self::Unsupported => "unsupported",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub user_id: String,
    pub reaction: String,
    pub item_channel: Option<String>,
    pub item_ts: Option<MessageTs>,
    pub item_user: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// A message a listener wants posted once every listener has run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub channel: String,
    pub thread_ts: Option<MessageTs>,
    pub message: MessageTemplate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(Reply),
    Processed,
    Ignored,
}

#[derive(Debug, Error)]
pub enum EventHandlerError {
    #[error(transparent)]
    State(#[from] TransactionError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventNormalizeError {
    #[error("event is missing `{0}`")]
    MissingField(&'static str),
    #[error(transparent)]
    Timestamp(#[from] DomainError),
    #[error("event payload is malformed: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, event_type: SlackEventType) -> bool;

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Debug, Default)]
pub struct DispatchReport {
    pub replies: Vec<Reply>,
    pub failures: Vec<(&'static str, EventHandlerError)>,
    pub handled: usize,
}

/// Listeners run one after another in registration order. A failing listener
/// is recorded in the report and does not stop the ones after it.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub async fn dispatch(&self, envelope: &SlackEnvelope, ctx: &EventContext) -> DispatchReport {
        let event_type = envelope.event.event_type();
        let mut report = DispatchReport::default();

        for handler in self.handlers.iter().filter(|handler| handler.accepts(event_type)) {
            match handler.handle(envelope, ctx).await {
                Ok(HandlerResult::Responded(reply)) => {
                    report.handled += 1;
                    report.replies.push(reply);
                }
                Ok(HandlerResult::Processed) => report.handled += 1,
                Ok(HandlerResult::Ignored) => {}
                Err(error) => {
                    warn!(
                        event_name = "slack.listener.failed",
                        correlation_id = %ctx.correlation_id,
                        listener = handler.name(),
                        error = %error,
                        "listener failed; continuing with remaining listeners"
                    );
                    report.failures.push((handler.name(), error));
                }
            }
        }

        report
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }
}

/// Writes every message and reaction to the log before anything else sees it.
pub struct EventLogger;

#[async_trait]
impl EventHandler for EventLogger {
    fn name(&self) -> &'static str {
        "event_logger"
    }

    fn accepts(&self, event_type: SlackEventType) -> bool {
        event_type != SlackEventType::Unsupported
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        match &envelope.event {
            SlackEvent::Message(message) => info!(
                event_name = "slack.event.message",
                correlation_id = %ctx.correlation_id,
                envelope_id = %envelope.envelope_id,
                channel = %message.channel,
                user = message.user.as_deref().unwrap_or("-"),
                ts = %message.ts,
                automated = message.is_automated(),
                hidden = message.hidden,
                text_len = message.text.chars().count(),
                "message event received"
            ),
            SlackEvent::ReactionAdded(reaction) => info!(
                event_name = "slack.event.reaction_added",
                correlation_id = %ctx.correlation_id,
                envelope_id = %envelope.envelope_id,
                user = %reaction.user_id,
                reaction = %reaction.reaction,
                item_channel = reaction.item_channel.as_deref().unwrap_or("-"),
                "reaction_added event received"
            ),
            SlackEvent::Unsupported { .. } => return Ok(HandlerResult::Ignored),
        }
        Ok(HandlerResult::Processed)
    }
}

#[derive(Deserialize)]
struct RawMessageEvent {
    channel: Option<String>,
    user: Option<String>,
    text: Option<String>,
    ts: Option<String>,
    thread_ts: Option<String>,
    subtype: Option<String>,
    bot_id: Option<String>,
    username: Option<String>,
    #[serde(default)]
    hidden: bool,
}

#[derive(Deserialize)]
struct RawReactionEvent {
    user: Option<String>,
    reaction: Option<String>,
    item: Option<RawReactionItem>,
    item_user: Option<String>,
}

#[derive(Deserialize)]
struct RawReactionItem {
    channel: Option<String>,
    ts: Option<String>,
}

/// Turns the `event` object of an `event_callback` body into a [`SlackEnvelope`].
pub fn normalize_event(envelope_id: &str, event: &Value) -> Result<SlackEnvelope, EventNormalizeError> {
    let event_type = event
        .get("type")
        .and_then(Value::as_str)
        .ok_or(EventNormalizeError::MissingField("type"))?;

    let event = match event_type {
        "message" => SlackEvent::Message(normalize_message(event)?),
        "reaction_added" => SlackEvent::ReactionAdded(normalize_reaction(event)?),
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(SlackEnvelope { envelope_id: envelope_id.to_owned(), event })
}

fn normalize_message(event: &Value) -> Result<ChatMessage, EventNormalizeError> {
    let raw = RawMessageEvent::deserialize(event)
        .map_err(|error| EventNormalizeError::Malformed(error.to_string()))?;

    let ts = raw.ts.ok_or(EventNormalizeError::MissingField("ts"))?.parse::<MessageTs>()?;
    let channel = raw
        .channel
        .filter(|channel| !channel.is_empty())
        .ok_or(EventNormalizeError::MissingField("channel"))?;
    let thread_ts = raw.thread_ts.map(|value| value.parse::<MessageTs>()).transpose()?;
    let automated = raw.bot_id.is_some() || raw.subtype.as_deref() == Some("bot_message");

    Ok(ChatMessage {
        ts,
        channel,
        user: raw.user.filter(|user| !user.is_empty()),
        text: raw.text.unwrap_or_default(),
        origin: if automated { MessageOrigin::Automated } else { MessageOrigin::Human },
        username: raw.username,
        thread_ts,
        hidden: raw.hidden,
    })
}

fn normalize_reaction(event: &Value) -> Result<ReactionAddedEvent, EventNormalizeError> {
    let raw = RawReactionEvent::deserialize(event)
        .map_err(|error| EventNormalizeError::Malformed(error.to_string()))?;
    let item = raw.item.unwrap_or(RawReactionItem { channel: None, ts: None });

    Ok(ReactionAddedEvent {
        user_id: raw.user.ok_or(EventNormalizeError::MissingField("user"))?,
        reaction: raw.reaction.ok_or(EventNormalizeError::MissingField("reaction"))?,
        item_channel: item.channel,
        item_ts: item.ts.map(|value| value.parse::<MessageTs>()).transpose()?,
        item_user: raw.item_user,
    })
}
