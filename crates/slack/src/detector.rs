//! Channel listener that keeps the sliding message window and publishes a
//! signal when the conversation looks lively.

use std::sync::Arc;

use async_trait::async_trait;
use hakatabot_core::classifier::{Classifier, ClassifierError, DetectorCommand, Verdict};
use hakatabot_core::config::DetectorConfig;
use hakatabot_core::domain::message::ChatMessage;
use hakatabot_core::domain::state::WindowState;
use hakatabot_core::signal::{SignalPayload, SignalPublisher};
use hakatabot_core::window::{RandomDraw, WindowDecision, WindowPolicy};
use hakatabot_db::{TransactionRunner, TransactionStep};
use tracing::{debug, info, warn};

use crate::blocks::{detector_alias_message, detector_opt_in_message, detector_opt_out_message};
use crate::events::{
    EventContext, EventHandler, EventHandlerError, HandlerResult, Reply, SlackEnvelope, SlackEvent,
    SlackEventType,
};

#[derive(Clone, Debug, PartialEq)]
pub enum DetectorOutcome {
    Command { command: DetectorCommand, changed: bool },
    Dropped,
    Duplicate,
    Recorded { verdict: Verdict, decision: WindowDecision, payload: Option<SignalPayload> },
}

pub struct SignalDetector {
    channel_id: String,
    state_key: String,
    persona_name: String,
    optin_command: String,
    redaction_marker: String,
    classifier: Classifier,
    policy: WindowPolicy,
    runner: TransactionRunner,
    publisher: Arc<dyn SignalPublisher>,
    draw: Arc<dyn RandomDraw>,
}

impl SignalDetector {
    pub fn new(
        config: &DetectorConfig,
        channel_id: impl Into<String>,
        runner: TransactionRunner,
        publisher: Arc<dyn SignalPublisher>,
        draw: Arc<dyn RandomDraw>,
    ) -> Result<Self, ClassifierError> {
        Ok(Self {
            channel_id: channel_id.into(),
            state_key: config.state_key.clone(),
            persona_name: config.persona_name.clone(),
            optin_command: config.optin_command.clone(),
            redaction_marker: config.redaction_marker.clone(),
            classifier: Classifier::from_config(config)?,
            policy: WindowPolicy::from_config(config),
            runner,
            publisher,
            draw,
        })
    }

    /// Messages outside the watched channel, thread replies, hidden edits and
    /// redacted messages never reach the window.
    pub fn watches(&self, message: &ChatMessage) -> bool {
        message.channel == self.channel_id
            && !message.is_thread_reply()
            && !message.hidden
            && !message.text.contains(self.redaction_marker.as_str())
    }

    pub async fn handle_message(
        &self,
        message: &ChatMessage,
        ctx: &EventContext,
    ) -> Result<DetectorOutcome, EventHandlerError> {
        let outcome = self
            .runner
            .run(&self.state_key, |mut state: WindowState| self.step(&mut state, message))
            .await?;

        match &outcome {
            DetectorOutcome::Command { command, changed } => info!(
                event_name = "detector.command.applied",
                correlation_id = %ctx.correlation_id,
                user = message.user.as_deref().unwrap_or("-"),
                command = ?command,
                changed,
                "detector command applied"
            ),
            DetectorOutcome::Dropped => debug!(
                event_name = "detector.message.dropped",
                correlation_id = %ctx.correlation_id,
                ts = %message.ts,
                "message from opted-out author dropped"
            ),
            DetectorOutcome::Duplicate => debug!(
                event_name = "detector.message.duplicate",
                correlation_id = %ctx.correlation_id,
                ts = %message.ts,
                "message already in window; redelivery skipped"
            ),
            DetectorOutcome::Recorded { verdict, decision, payload } => {
                info!(
                    event_name = "detector.message.classified",
                    correlation_id = %ctx.correlation_id,
                    ts = %message.ts,
                    verdict = verdict.label(),
                    human_count = decision.human_count,
                    noise_count = decision.noise_count,
                    distinct_authors = decision.distinct_authors,
                    fired = decision.fired.map(|path| path.as_str()).unwrap_or("none"),
                    "message recorded in window"
                );
                if let Some(payload) = payload {
                    self.spawn_publish(payload.clone(), ctx);
                }
            }
        }

        Ok(outcome)
    }

    fn step(
        &self,
        state: &mut WindowState,
        message: &ChatMessage,
    ) -> TransactionStep<WindowState, DetectorOutcome> {
        if let Some(command) = self.classifier.parse_command(message) {
            let user = message.user.as_deref().unwrap_or_default();
            let changed = match &command {
                DetectorCommand::OptOut => state.opt_out(user),
                DetectorCommand::OptIn => state.opt_in(user),
                DetectorCommand::SetAlias(alias) => {
                    state.set_alias(user, alias).as_deref() != Some(alias.as_str())
                }
            };
            let outcome = DetectorOutcome::Command { command, changed };
            return if changed {
                TransactionStep::Write { state: std::mem::take(state), output: outcome }
            } else {
                TransactionStep::Skip(outcome)
            };
        }

        if message.author_key().is_some_and(|author| state.is_opted_out(author)) {
            return TransactionStep::Skip(DetectorOutcome::Dropped);
        }
        if state.holds(message.ts) {
            return TransactionStep::Skip(DetectorOutcome::Duplicate);
        }

        let verdict = self.classifier.classify_content(message);
        let decision = self.policy.apply(state, message.clone(), &verdict, self.draw.as_ref());
        let payload =
            decision.fired().then(|| SignalPayload::from_window(state, decision.previous_signal));

        TransactionStep::Write {
            state: std::mem::take(state),
            output: DetectorOutcome::Recorded { verdict, decision, payload },
        }
    }

    /// Runs the publish on its own task so the webhook acknowledgement never
    /// waits on the bus. The window is already committed at this point.
    fn spawn_publish(&self, payload: SignalPayload, ctx: &EventContext) {
        let publisher = Arc::clone(&self.publisher);
        let correlation_id = ctx.correlation_id.clone();
        tokio::spawn(async move {
            match publisher.publish(&payload).await {
                Ok(()) => info!(
                    event_name = "detector.signal.published",
                    correlation_id = %correlation_id,
                    human_messages = payload.human_messages.len(),
                    bot_messages = payload.bot_messages.len(),
                    "signal published"
                ),
                Err(error) => warn!(
                    event_name = "detector.signal.publish_failed",
                    correlation_id = %correlation_id,
                    error = %error,
                    "signal publish failed; state already committed"
                ),
            }
        });
    }

    fn acknowledgement(&self, message: &ChatMessage, command: &DetectorCommand, changed: bool) -> Reply {
        let user = message.user.as_deref().unwrap_or_default();
        let template = match command {
            DetectorCommand::OptOut => {
                detector_opt_out_message(user, &self.persona_name, &self.optin_command, changed)
            }
            DetectorCommand::OptIn => detector_opt_in_message(user, &self.persona_name, changed),
            DetectorCommand::SetAlias(alias) => detector_alias_message(user, alias),
        };
        Reply { channel: message.channel.clone(), thread_ts: Some(message.ts), message: template }
    }
}

#[async_trait]
impl EventHandler for SignalDetector {
    fn name(&self) -> &'static str {
        "signal_detector"
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
        if !self.watches(message) {
            return Ok(HandlerResult::Ignored);
        }

        match self.handle_message(message, ctx).await? {
            DetectorOutcome::Command { command, changed } => {
                Ok(HandlerResult::Responded(self.acknowledgement(message, &command, changed)))
            }
            DetectorOutcome::Duplicate => Ok(HandlerResult::Ignored),
            DetectorOutcome::Dropped | DetectorOutcome::Recorded { .. } => Ok(HandlerResult::Processed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use hakatabot_core::classifier::{DetectorCommand, Verdict};
    use hakatabot_core::config::DetectorConfig;
    use hakatabot_core::domain::message::{ChatMessage, MessageOrigin, MessageTs};
    use hakatabot_core::domain::state::WindowState;
    use async_trait::async_trait;
    use hakatabot_core::signal::{InMemorySignalPublisher, PublishError, SignalPayload, SignalPublisher};
    use hakatabot_core::window::{FixedDraw, SignalPath};
    use hakatabot_db::{InMemoryStateStore, StateStore, TransactionRunner};
    use serde_json::json;

    use super::{DetectorOutcome, SignalDetector};
    use crate::events::{EventContext, EventHandler, HandlerResult, SlackEnvelope, SlackEvent};

    const BASE: i64 = 1_730_000_000;
    const KEY: &str = "rinna-signal";

    struct Harness {
        store: Arc<InMemoryStateStore>,
        publisher: Arc<InMemorySignalPublisher>,
        detector: SignalDetector,
    }

    fn harness_with(publisher: InMemorySignalPublisher, draw: f64) -> Harness {
        let store = Arc::new(InMemoryStateStore::default());
        let publisher = Arc::new(publisher);
        let runner = TransactionRunner::new(store.clone()).with_backoff(Duration::ZERO);
        let detector = SignalDetector::new(
            &DetectorConfig::default(),
            "C-SANDBOX",
            runner,
            publisher.clone(),
            Arc::new(FixedDraw(draw)),
        )
        .expect("detector");
        Harness { store, publisher, detector }
    }

    fn harness() -> Harness {
        harness_with(InMemorySignalPublisher::default(), 0.0)
    }

    fn message(secs: i64, user: &str, text: &str) -> ChatMessage {
        ChatMessage {
            ts: MessageTs::from_secs(BASE + secs),
            channel: "C-SANDBOX".to_owned(),
            user: Some(user.to_owned()),
            text: text.to_owned(),
            origin: MessageOrigin::Human,
            username: None,
            thread_ts: None,
            hidden: false,
        }
    }

    async fn stored_state(store: &InMemoryStateStore) -> WindowState {
        serde_json::from_value(store.body(KEY).await.expect("document exists")).expect("decode")
    }

    /// Waits for the detached publish tasks to land `count` payloads.
    async fn published(publisher: &InMemorySignalPublisher, count: usize) -> Vec<SignalPayload> {
        for _ in 0..100 {
            let published = publisher.published().await;
            if published.len() >= count {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        publisher.published().await
    }

    async fn stored_version(store: &InMemoryStateStore) -> i64 {
        store.load(KEY).await.expect("load").expect("document exists").version
    }

    #[tokio::test]
    async fn opted_out_author_leaves_no_trace() {
        let h = harness();
        h.store.insert(KEY, json!({"optoutUserIds": ["U1"], "lastSignalTimestamp": 0.0})).await;

        let outcome =
            h.detector.handle_message(&message(10, "U1", "hey rinna"), &EventContext::default()).await.expect("handle");

        assert_eq!(outcome, DetectorOutcome::Dropped);
        let state = stored_state(&h.store).await;
        assert!(state.recent_human_messages.is_empty());
        assert!(h.publisher.published().await.is_empty());
    }

    #[tokio::test]
    async fn opt_out_command_updates_list_and_opted_out_user_can_opt_back_in() {
        let h = harness();
        let ctx = EventContext::default();

        let outcome = h.detector.handle_message(&message(1, "U1", "@rinna optout"), &ctx).await.expect("optout");
        assert_eq!(outcome, DetectorOutcome::Command { command: DetectorCommand::OptOut, changed: true });
        assert!(stored_state(&h.store).await.is_opted_out("U1"));

        let outcome = h.detector.handle_message(&message(2, "U1", "@rinna optout"), &ctx).await.expect("repeat");
        assert_eq!(outcome, DetectorOutcome::Command { command: DetectorCommand::OptOut, changed: false });

        let outcome = h.detector.handle_message(&message(3, "U1", "@rinna optin"), &ctx).await.expect("optin");
        assert_eq!(outcome, DetectorOutcome::Command { command: DetectorCommand::OptIn, changed: true });
        assert!(!stored_state(&h.store).await.is_opted_out("U1"));
    }

    #[tokio::test]
    async fn alias_command_records_mapping() {
        let h = harness();

        h.detector
            .handle_message(&message(1, "U1", "@rinna id fitbit-7"), &EventContext::default())
            .await
            .expect("alias");

        let state = stored_state(&h.store).await;
        assert_eq!(state.user_id_alias_map.get("U1").map(String::as_str), Some("fitbit-7"));
    }

    #[tokio::test]
    async fn trigger_phrase_publishes_with_previous_signal() {
        let h = harness_with(InMemorySignalPublisher::default(), 1.0);
        h.store.insert(KEY, json!({"lastSignalTimestamp": (BASE + 5) as f64})).await;

        let outcome = h
            .detector
            .handle_message(&message(10, "U1", "rinna, what do you think?"), &EventContext::default())
            .await
            .expect("handle");

        let DetectorOutcome::Recorded { verdict, decision, .. } = outcome else {
            panic!("expected recorded outcome");
        };
        assert_eq!(verdict, Verdict::Human { trigger: true });
        assert_eq!(decision.fired, Some(SignalPath::Immediate));

        let published = published(&h.publisher, 1).await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].last_signal, (BASE + 5) as f64);
        assert_eq!(published[0].human_messages.len(), 1);
        assert_eq!(stored_state(&h.store).await.last_signal(), MessageTs::from_secs(BASE + 10));
    }

    #[tokio::test]
    async fn aggregate_signal_fires_once_window_is_lively() {
        let h = harness();
        let ctx = EventContext::default();
        let authors = ["A", "B", "C", "A", "B"];

        for (index, author) in authors.iter().enumerate() {
            h.detector
                .handle_message(&message(index as i64 * 30, author, "chatting away"), &ctx)
                .await
                .expect("handle");
        }

        let published = published(&h.publisher, 1).await;
        assert_eq!(published.len(), 1, "fifth human message from three authors fires");
        assert_eq!(published[0].human_messages.len(), 5);
        assert_eq!(published[0].last_signal, 0.0);
    }

    #[tokio::test]
    async fn publish_failure_is_swallowed_after_commit() {
        let h = harness_with(InMemorySignalPublisher::failing("bus down"), 0.0);

        let outcome = h
            .detector
            .handle_message(&message(10, "U1", "rinna?"), &EventContext::default())
            .await
            .expect("publish failure must not surface");

        assert!(matches!(outcome, DetectorOutcome::Recorded { .. }));
        assert_eq!(stored_state(&h.store).await.last_signal(), MessageTs::from_secs(BASE + 10));
    }

    struct StalledPublisher;

    #[async_trait]
    impl SignalPublisher for StalledPublisher {
        async fn publish(&self, _payload: &SignalPayload) -> Result<(), PublishError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stalled_bus_does_not_hold_up_the_handler() {
        let store = Arc::new(InMemoryStateStore::default());
        let runner = TransactionRunner::new(store.clone()).with_backoff(Duration::ZERO);
        let detector = SignalDetector::new(
            &DetectorConfig::default(),
            "C-SANDBOX",
            runner,
            Arc::new(StalledPublisher),
            Arc::new(FixedDraw(1.0)),
        )
        .expect("detector");

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            detector.handle_message(&message(10, "U1", "rinna?"), &EventContext::default()),
        )
        .await
        .expect("handler returns while the publish is still pending")
        .expect("handle");

        let DetectorOutcome::Recorded { decision, .. } = outcome else {
            panic!("expected recorded outcome");
        };
        assert!(decision.fired());
        assert_eq!(stored_state(&store).await.last_signal(), MessageTs::from_secs(BASE + 10));
    }

    #[tokio::test]
    async fn window_is_pruned_on_every_write() {
        let h = harness_with(InMemorySignalPublisher::default(), 1.0);
        let ctx = EventContext::default();

        h.detector.handle_message(&message(0, "A", "morning"), &ctx).await.expect("first");
        h.detector.handle_message(&message(900, "B", "evening"), &ctx).await.expect("second");

        let state = stored_state(&h.store).await;
        let kept: Vec<_> = state.recent_human_messages.iter().map(|m| m.user.clone()).collect();
        assert_eq!(kept, vec![Some("B".to_owned())]);
    }

    #[tokio::test]
    async fn handler_filters_channel_threads_hidden_and_redacted_messages() {
        let h = harness();
        let ctx = EventContext::default();

        let mut other_channel = message(1, "U1", "hello");
        other_channel.channel = "C-OTHER".to_owned();
        let mut thread_reply = message(2, "U1", "hello");
        thread_reply.thread_ts = Some(MessageTs::from_secs(BASE));
        let mut hidden = message(3, "U1", "hello");
        hidden.hidden = true;
        let redacted = message(4, "U1", "my password is [redacted]");

        for message in [other_channel, thread_reply, hidden, redacted] {
            let envelope = SlackEnvelope { envelope_id: "Ev".to_owned(), event: SlackEvent::Message(message) };
            assert_eq!(h.detector.handle(&envelope, &ctx).await.expect("handle"), HandlerResult::Ignored);
        }
        assert!(h.store.body(KEY).await.is_none());
    }

    #[tokio::test]
    async fn handler_replies_in_thread_to_commands() {
        let h = harness();
        let command = message(1, "U1", "@rinna optout");
        let envelope =
            SlackEnvelope { envelope_id: "Ev".to_owned(), event: SlackEvent::Message(command.clone()) };

        let result = h.detector.handle(&envelope, &EventContext::default()).await.expect("handle");

        let HandlerResult::Responded(reply) = result else {
            panic!("expected acknowledgement");
        };
        assert_eq!(reply.channel, "C-SANDBOX");
        assert_eq!(reply.thread_ts, Some(command.ts));
        assert!(reply.message.fallback_text.contains("opted out"));
    }

    #[tokio::test]
    async fn same_ts_delivered_twice_is_recorded_once() {
        let h = harness_with(InMemorySignalPublisher::default(), 1.0);
        let ctx = EventContext::default();
        let repeated = message(10, "U1", "rinna, what do you think?");

        let first = h.detector.handle_message(&repeated, &ctx).await.expect("first delivery");
        assert!(matches!(first, DetectorOutcome::Recorded { .. }));
        assert_eq!(published(&h.publisher, 1).await.len(), 1);
        let version = stored_version(&h.store).await;

        let second = h.detector.handle_message(&repeated, &ctx).await.expect("second delivery");

        assert_eq!(second, DetectorOutcome::Duplicate);
        assert_eq!(stored_state(&h.store).await.recent_human_messages.len(), 1);
        assert_eq!(stored_version(&h.store).await, version, "redelivery must not write");
        assert_eq!(h.publisher.published().await.len(), 1);
    }

    #[tokio::test]
    async fn contention_is_retried_by_the_runner() {
        let h = harness_with(InMemorySignalPublisher::default(), 1.0);
        h.store.force_conflicts(2);

        h.detector
            .handle_message(&message(1, "U1", "hello"), &EventContext::default())
            .await
            .expect("retried");

        assert_eq!(stored_state(&h.store).await.recent_human_messages.len(), 1);
    }
}
