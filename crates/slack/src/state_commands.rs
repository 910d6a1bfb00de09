use async_trait::async_trait;
use hakatabot_core::config::CommandFeatureConfig;
use hakatabot_core::domain::message::ChatMessage;
use hakatabot_core::domain::state::CommandState;
use hakatabot_db::{TransactionRunner, TransactionStep};
use tracing::info;

use crate::blocks::{
    feature_link_message, feature_opt_in_message, feature_opt_out_message, unsure_message,
    MessageTemplate,
};
use crate::commands::{parse_feature_command, FeatureOperation};
use crate::events::{
    EventContext, EventHandler, EventHandlerError, HandlerResult, Reply, SlackEnvelope, SlackEvent,
    SlackEventType,
};

/// Answers `<prefix> optin|optout|id ...` for every configured feature. Each
/// feature owns one [`CommandState`] document.
pub struct FeatureCommandHandler {
    features: Vec<CommandFeatureConfig>,
    runner: TransactionRunner,
}

impl FeatureCommandHandler {
    pub fn new(features: Vec<CommandFeatureConfig>, runner: TransactionRunner) -> Self {
        Self { features, runner }
    }

    /// `None` when the message is not addressed to any feature.
    pub async fn execute(
        &self,
        message: &ChatMessage,
        ctx: &EventContext,
    ) -> Result<Option<MessageTemplate>, EventHandlerError> {
        if message.is_automated() {
            return Ok(None);
        }
        let Some(user) = message.user.as_deref().filter(|user| !user.is_empty()) else {
            return Ok(None);
        };

        let prefixes = self.features.iter().map(|feature| feature.prefix.as_str());
        let Some(command) = parse_feature_command(&message.text, prefixes) else {
            return Ok(None);
        };
        let Some(feature) = self.features.iter().find(|feature| feature.prefix == command.prefix)
        else {
            return Ok(None);
        };

        let operation = match command.operation {
            Ok(operation) => operation,
            Err(error) => {
                info!(
                    event_name = "feature.command.unsure",
                    correlation_id = %ctx.correlation_id,
                    feature = %feature.prefix,
                    reason = %error,
                    "feature command not understood"
                );
                return Ok(Some(unsure_message()));
            }
        };

        let changed = self
            .runner
            .run(&feature.state_key, |mut state: CommandState| {
                let changed = match &operation {
                    FeatureOperation::OptIn(name) => state.opt_in(name),
                    FeatureOperation::OptOut(name) => state.opt_out(name),
                    FeatureOperation::Link(service_id) => {
                        state.link_identity(user, service_id).as_deref() != Some(service_id.as_str())
                    }
                };
                if changed {
                    TransactionStep::Write { state, output: true }
                } else {
                    TransactionStep::Skip(false)
                }
            })
            .await?;

        info!(
            event_name = "feature.command.applied",
            correlation_id = %ctx.correlation_id,
            feature = %feature.prefix,
            state_key = %feature.state_key,
            operation = operation.name(),
            user,
            changed,
            "feature command applied"
        );

        Ok(Some(match &operation {
            FeatureOperation::OptIn(name) => feature_opt_in_message(&feature.prefix, name),
            FeatureOperation::OptOut(name) => feature_opt_out_message(&feature.prefix, name),
            FeatureOperation::Link(service_id) => {
                feature_link_message(&feature.prefix, user, service_id)
            }
        }))
    }
}

#[async_trait]
impl EventHandler for FeatureCommandHandler {
    fn name(&self) -> &'static str {
        "feature_commands"
    }

    fn accepts(&self, event_type: SlackEventType) -> bool {
        event_type == SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        Ok(match self.execute(message, ctx).await? {
            Some(template) => HandlerResult::Responded(Reply {
                channel: message.channel.clone(),
                thread_ts: None,
                message: template,
            }),
            None => HandlerResult::Ignored,
        })
    }
}
