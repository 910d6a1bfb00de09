//! Per-message decision logic of the signal detector.
//!
//! Classification is pure: it looks at one message and the opt-out set and
//! never touches the store.

pub mod denylist;

use std::collections::{BTreeSet, HashSet};

use regex::RegexSet;
use thiserror::Error;

use crate::config::DetectorConfig;
use crate::domain::message::ChatMessage;

pub use denylist::Denylist;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DetectorCommand {
    OptIn,
    OptOut,
    SetAlias(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Author opted out; the message leaves no trace.
    Dropped,
    Human { trigger: bool },
    Noise,
    Command(DetectorCommand),
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dropped => "dropped",
            Self::Human { trigger: true } => "human_trigger",
            Self::Human { trigger: false } => "human",
            Self::Noise => "noise",
            Self::Command(_) => "command",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("invalid trigger pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

#[derive(Clone, Debug)]
pub struct Classifier {
    optout_command: String,
    optin_command: String,
    alias_command_prefix: String,
    trusted_personas: HashSet<String>,
    system_user_ids: HashSet<String>,
    denylist: Denylist,
    triggers: RegexSet,
}

impl Classifier {
    pub fn from_config(config: &DetectorConfig) -> Result<Self, ClassifierError> {
        let persona = format!("(?i){}", regex::escape(config.persona_name.trim()));
        let triggers =
            RegexSet::new(std::iter::once(persona).chain(config.trigger_patterns.iter().cloned()))?;

        Ok(Self {
            optout_command: config.optout_command.clone(),
            optin_command: config.optin_command.clone(),
            alias_command_prefix: config.alias_command_prefix.clone(),
            trusted_personas: config.trusted_personas.iter().cloned().collect(),
            system_user_ids: config.system_user_ids.iter().cloned().collect(),
            denylist: Denylist::from_config(config),
            triggers,
        })
    }

    /// Full rule chain in priority order.
    pub fn classify(&self, message: &ChatMessage, optout_user_ids: &BTreeSet<String>) -> Verdict {
        if message.author_key().is_some_and(|author| optout_user_ids.contains(author)) {
            return Verdict::Dropped;
        }

        if let Some(command) = self.parse_command(message) {
            return Verdict::Command(command);
        }

        self.classify_content(message)
    }

    /// Human/Noise split plus the trigger check, for callers that have already
    /// handled commands and opt-outs.
    pub fn classify_content(&self, message: &ChatMessage) -> Verdict {
        if message.text.trim().is_empty() {
            return Verdict::Noise;
        }

        if message.is_automated() {
            let trusted = message
                .username
                .as_deref()
                .is_some_and(|persona| self.trusted_personas.contains(persona));
            if !trusted {
                return Verdict::Noise;
            }
        } else {
            let Some(user) = message.user.as_deref().filter(|user| !user.is_empty()) else {
                return Verdict::Noise;
            };
            if self.system_user_ids.contains(user) {
                return Verdict::Noise;
            }
            if self.denylist.matches(&message.text) {
                return Verdict::Noise;
            }
        }

        Verdict::Human { trigger: self.is_trigger(&message.text) }
    }

    /// Reserved command strings. Only humans with a real, non-system account can issue them.
    pub fn parse_command(&self, message: &ChatMessage) -> Option<DetectorCommand> {
        if !self.can_issue_commands(message) {
            return None;
        }

        let text = message.text.as_str();
        if text == self.optout_command {
            return Some(DetectorCommand::OptOut);
        }
        if text == self.optin_command {
            return Some(DetectorCommand::OptIn);
        }

        let rest = text.strip_prefix(self.alias_command_prefix.as_str())?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let mut tokens = rest.split_whitespace();
        match (tokens.next(), tokens.next()) {
            (Some(alias), None) => Some(DetectorCommand::SetAlias(alias.to_owned())),
            _ => None,
        }
    }

    pub fn is_trigger(&self, text: &str) -> bool {
        self.triggers.is_match(text)
    }

    fn can_issue_commands(&self, message: &ChatMessage) -> bool {
        !message.is_automated()
            && message
                .user
                .as_deref()
                .is_some_and(|user| !user.is_empty() && !self.system_user_ids.contains(user))
    }
}
