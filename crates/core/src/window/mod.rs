pub mod damping;

use std::collections::HashSet;

use crate::classifier::Verdict;
use crate::config::DetectorConfig;
use crate::domain::message::{ChatMessage, MessageTs};
use crate::domain::state::WindowState;

pub use damping::{FixedDraw, RandomDraw, SeededDraw, ThreadRngDraw};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalPath {
    Immediate,
    Aggregate,
}

impl SignalPath {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Aggregate => "aggregate",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WindowDecision {
    pub fired: Option<SignalPath>,
    pub human_count: usize,
    pub noise_count: usize,
    pub distinct_authors: usize,
    /// `lastSignalTimestamp` as it was before this message.
    pub previous_signal: MessageTs,
}

impl WindowDecision {
    pub fn fired(&self) -> bool {
        self.fired.is_some()
    }
}

/// Thresholds of the sliding window. Built once from [`DetectorConfig`].
#[derive(Clone, Debug, PartialEq)]
pub struct WindowPolicy {
    pub retention_secs: i64,
    pub cooldown_secs: i64,
    pub min_human_messages: usize,
    pub min_distinct_authors: usize,
    pub max_noise_ratio: f64,
    pub damping_probability: f64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl WindowPolicy {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            retention_secs: config.retention_secs,
            cooldown_secs: config.cooldown_secs,
            min_human_messages: config.min_human_messages,
            min_distinct_authors: config.min_distinct_authors,
            max_noise_ratio: config.max_noise_ratio,
            damping_probability: config.damping_probability,
        }
    }

    /// Keeps entries strictly newer than `current - retention`.
    pub fn prune(&self, messages: &mut Vec<ChatMessage>, current: MessageTs) {
        let horizon = current.saturating_sub_secs(self.retention_secs);
        messages.retain(|message| message.ts > horizon);
    }

    /// Appends the classified message, prunes both sequences and decides whether
    /// a signal fires. On fire the state's last signal moves to `message.ts`.
    ///
    /// Dropped and command verdicts leave the state untouched, and so does a
    /// redelivery of a `ts` the window already holds.
    pub fn apply(
        &self,
        state: &mut WindowState,
        message: ChatMessage,
        verdict: &Verdict,
        draw: &dyn RandomDraw,
    ) -> WindowDecision {
        let current = message.ts;
        if state.holds(current) {
            return unchanged(state);
        }

        match verdict {
            Verdict::Human { .. } => state.recent_human_messages.push(message),
            Verdict::Noise => state.recent_bot_messages.push(message),
            Verdict::Dropped | Verdict::Command(_) => return unchanged(state),
        }

        self.prune(&mut state.recent_human_messages, current);
        self.prune(&mut state.recent_bot_messages, current);

        let decision = self.decide(state, current, verdict, draw);
        if decision.fired() {
            state.record_signal(current);
        }
        decision
    }

    /// Evaluates the immediate path first; the aggregate path only draws when
    /// every deterministic condition holds.
    pub fn decide(
        &self,
        state: &WindowState,
        current: MessageTs,
        verdict: &Verdict,
        draw: &dyn RandomDraw,
    ) -> WindowDecision {
        let human_count = state.recent_human_messages.len();
        let noise_count = state.recent_bot_messages.len();
        let distinct_authors = distinct_authors(&state.recent_human_messages);
        let previous_signal = state.last_signal();

        let fired = if matches!(verdict, Verdict::Human { trigger: true }) {
            Some(SignalPath::Immediate)
        } else {
            let cooled_down = current >= previous_signal.saturating_add_secs(self.cooldown_secs);
            let aggregate = human_count >= self.min_human_messages
                && noise_count as f64 <= human_count as f64 * self.max_noise_ratio
                && distinct_authors >= self.min_distinct_authors
                && cooled_down
                && draw.draw() < self.damping_probability;
            aggregate.then_some(SignalPath::Aggregate)
        };

        WindowDecision { fired, human_count, noise_count, distinct_authors, previous_signal }
    }
}

fn unchanged(state: &WindowState) -> WindowDecision {
    WindowDecision {
        fired: None,
        human_count: state.recent_human_messages.len(),
        noise_count: state.recent_bot_messages.len(),
        distinct_authors: distinct_authors(&state.recent_human_messages),
        previous_signal: state.last_signal(),
    }
}

fn distinct_authors(messages: &[ChatMessage]) -> usize {
    messages.iter().filter_map(ChatMessage::author_key).collect::<HashSet<_>>().len()
}
