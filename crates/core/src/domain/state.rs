use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::domain::message::{ChatMessage, MessageTs};

/// Persisted document of the signal detector.
///
/// Field names match the stored JSON layout. `optout_user_ids` is a set, so
/// documents written with duplicate entries collapse on the next read.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowState {
    pub recent_bot_messages: Vec<ChatMessage>,
    pub recent_human_messages: Vec<ChatMessage>,
    pub last_signal_timestamp: f64,
    pub optout_user_ids: BTreeSet<String>,
    pub user_id_alias_map: BTreeMap<String, String>,
}

impl WindowState {
    pub fn is_opted_out(&self, user_id: &str) -> bool {
        self.optout_user_ids.contains(user_id)
    }

    /// Returns `false` when the user was already opted out.
    pub fn opt_out(&mut self, user_id: &str) -> bool {
        self.optout_user_ids.insert(user_id.to_owned())
    }

    /// Returns `false` when the user was not opted out.
    pub fn opt_in(&mut self, user_id: &str) -> bool {
        self.optout_user_ids.remove(user_id)
    }

    pub fn set_alias(&mut self, user_id: &str, alias: &str) -> Option<String> {
        self.user_id_alias_map.insert(user_id.to_owned(), alias.to_owned())
    }

    /// A delivery whose `ts` is already in either sequence has been recorded.
    pub fn holds(&self, ts: MessageTs) -> bool {
        self.recent_human_messages
            .iter()
            .chain(self.recent_bot_messages.iter())
            .any(|message| message.ts == ts)
    }

    pub fn last_signal(&self) -> MessageTs {
        MessageTs::from_secs_f64(self.last_signal_timestamp)
    }

    /// Never moves the stored value backwards.
    pub fn record_signal(&mut self, ts: MessageTs) {
        if ts > self.last_signal() {
            self.last_signal_timestamp = ts.as_secs_f64();
        }
    }
}

/// Persisted document of a per-service command feature.
///
/// `optout_users` holds service display names, not chat ids; `identity_links`
/// maps a chat id to the id the user has on the collaborating service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandState {
    pub optout_users: BTreeSet<String>,
    #[serde(rename = "slackUsers")]
    pub identity_links: BTreeMap<String, String>,
}

impl CommandState {
    pub fn is_opted_out(&self, display_name: &str) -> bool {
        self.optout_users.contains(display_name)
    }

    pub fn opt_out(&mut self, display_name: &str) -> bool {
        self.optout_users.insert(display_name.to_owned())
    }

    pub fn opt_in(&mut self, display_name: &str) -> bool {
        self.optout_users.remove(display_name)
    }

    pub fn link_identity(&mut self, chat_user_id: &str, service_id: &str) -> Option<String> {
        self.identity_links.insert(chat_user_id.to_owned(), service_id.to_owned())
    }

    /// Reverse lookup used by report jobs that iterate service accounts.
    pub fn chat_user_for(&self, service_id: &str) -> Option<&str> {
        self.identity_links
            .iter()
            .find(|(_, linked)| linked.as_str() == service_id)
            .map(|(chat_user_id, _)| chat_user_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::{CommandState, WindowState};
    use crate::domain::message::{ChatMessage, MessageOrigin, MessageTs};

    fn message(secs: i64, user: &str) -> ChatMessage {
        ChatMessage {
            ts: MessageTs::from_secs(secs),
            channel: "C1".to_owned(),
            user: Some(user.to_owned()),
            text: format!("message from {user}"),
            origin: MessageOrigin::Human,
            username: None,
            thread_ts: None,
            hidden: false,
        }
    }

    #[test]
    fn window_state_round_trips_through_json() {
        let mut state = WindowState::default();
        state.opt_out("U3");
        state.opt_out("U1");
        state.set_alias("U1", "fitbit-1");
        state.recent_human_messages = vec![message(100, "U1"), message(110, "U2")];
        state.recent_bot_messages = vec![message(105, "B1")];
        state.record_signal(MessageTs::from_secs(90));

        let encoded = serde_json::to_string(&state).expect("serialize");
        let decoded: WindowState = serde_json::from_str(&encoded).expect("deserialize");

        assert_eq!(decoded, state);
        assert_eq!(
            decoded.optout_user_ids,
            ["U1", "U3"].into_iter().map(str::to_owned).collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn window_state_reads_legacy_document_with_duplicates_and_missing_fields() {
        let document = json!({
            "optoutUserIds": ["U1", "U1", "U2"],
            "unrelatedField": true,
        });

        let state: WindowState = serde_json::from_value(document).expect("lenient decode");

        assert_eq!(state.optout_user_ids.len(), 2);
        assert!(state.recent_human_messages.is_empty());
        assert_eq!(state.last_signal(), MessageTs::ZERO);
    }

    #[test]
    fn opt_out_is_deduplicated_and_reversible() {
        let mut state = WindowState::default();
        assert!(state.opt_out("U1"));
        assert!(!state.opt_out("U1"));
        assert!(state.is_opted_out("U1"));
        assert!(state.opt_in("U1"));
        assert!(!state.opt_in("U1"));
        assert!(!state.is_opted_out("U1"));
    }

    #[test]
    fn record_signal_is_monotonic() {
        let mut state = WindowState::default();
        state.record_signal(MessageTs::from_secs(200));
        state.record_signal(MessageTs::from_secs(100));
        assert_eq!(state.last_signal(), MessageTs::from_secs(200));
    }

    #[test]
    fn command_state_uses_stored_field_names() {
        let mut state = CommandState::default();
        state.opt_out("bob");
        state.link_identity("U1", "ABC123");

        let json = serde_json::to_value(&state).expect("serialize");
        assert_eq!(json["optoutUsers"], json!(["bob"]));
        assert_eq!(json["slackUsers"]["U1"], "ABC123");
        assert_eq!(state.chat_user_for("ABC123"), Some("U1"));
    }
}
