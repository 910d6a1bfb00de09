use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

const MICROS_PER_SEC: i64 = 1_000_000;

/// Slack message timestamp (`"1730000000.123456"`), kept as whole microseconds.
///
/// Doubles as the ordering key of the window and the idempotency key of a
/// delivery, so comparisons are exact integer comparisons.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageTs(i64);

impl MessageTs {
    pub const ZERO: Self = Self(0);

    pub fn from_micros(micros: i64) -> Self {
        Self(micros.max(0))
    }

    pub fn from_secs(secs: i64) -> Self {
        Self::from_micros(secs.saturating_mul(MICROS_PER_SEC))
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return Self::ZERO;
        }
        Self::from_micros((secs * MICROS_PER_SEC as f64).round() as i64)
    }

    pub fn micros(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / MICROS_PER_SEC as f64
    }

    pub fn saturating_sub_secs(self, secs: i64) -> Self {
        Self::from_micros(self.0.saturating_sub(secs.saturating_mul(MICROS_PER_SEC)))
    }

    pub fn saturating_add_secs(self, secs: i64) -> Self {
        Self::from_micros(self.0.saturating_add(secs.saturating_mul(MICROS_PER_SEC)))
    }
}

impl FromStr for MessageTs {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let invalid = || DomainError::InvalidTimestamp(value.to_owned());
        let (secs, fraction) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let secs = secs.parse::<i64>().map_err(|_| invalid())?;
        let mut digits = fraction.chars().take(6).collect::<String>();
        while digits.len() < 6 {
            digits.push('0');
        }
        let micros = digits.parse::<i64>().map_err(|_| invalid())?;

        secs.checked_mul(MICROS_PER_SEC)
            .and_then(|whole| whole.checked_add(micros))
            .map(Self)
            .ok_or_else(invalid)
    }
}

impl TryFrom<String> for MessageTs {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageTs> for String {
    fn from(value: MessageTs) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MessageTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0 / MICROS_PER_SEC, self.0 % MICROS_PER_SEC)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageOrigin {
    #[default]
    Human,
    Automated,
}

/// A chat message as observed by the listeners. Never mutated after ingress.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub ts: MessageTs,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub origin: MessageOrigin,
    /// Display name of the persona an automated account posted as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<MessageTs>,
    #[serde(default)]
    pub hidden: bool,
}

impl ChatMessage {
    pub fn is_automated(&self) -> bool {
        self.origin == MessageOrigin::Automated
    }

    /// Replies inside a thread. A thread's parent carries `thread_ts == ts` and is not a reply.
    pub fn is_thread_reply(&self) -> bool {
        self.thread_ts.is_some_and(|parent| parent != self.ts)
    }

    /// Identity used for opt-out lookups and distinct-author counting.
    pub fn author_key(&self) -> Option<&str> {
        self.user.as_deref().or(self.username.as_deref()).filter(|key| !key.is_empty())
    }
}
