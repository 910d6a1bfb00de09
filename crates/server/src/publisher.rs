use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hakatabot_core::config::BusConfig;
use hakatabot_core::signal::{PublishError, SignalPayload, SignalPublisher, SIGNAL_MESSAGE_TYPE};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct PublishRequest {
    pub messages: Vec<PubSubMessage>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct PubSubMessage {
    /// Base64 of the JSON-encoded payload.
    pub data: String,
    pub attributes: BTreeMap<String, String>,
}

impl PublishRequest {
    pub fn for_signal(payload: &SignalPayload) -> Result<Self, PublishError> {
        let json =
            serde_json::to_vec(payload).map_err(|error| PublishError::Encode(error.to_string()))?;
        let attributes = BTreeMap::from([("type".to_owned(), SIGNAL_MESSAGE_TYPE.to_owned())]);
        Ok(Self { messages: vec![PubSubMessage { data: STANDARD.encode(json), attributes }] })
    }
}

/// Publishes signals to a Pub/Sub topic over the REST API.
pub struct PubSubPublisher {
    client: Client,
    topic_url: String,
    access_token: SecretString,
}

impl PubSubPublisher {
    pub fn from_config(bus: &BusConfig) -> Result<Self, PublishError> {
        let project_id = bus
            .project_id
            .as_deref()
            .ok_or_else(|| PublishError::Transport("bus.project_id is not set".to_owned()))?;
        let access_token = bus
            .access_token
            .clone()
            .ok_or_else(|| PublishError::Transport("bus.access_token is not set".to_owned()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|error| PublishError::Transport(error.to_string()))?;

        Ok(Self { client, topic_url: topic_url(&bus.endpoint, project_id, &bus.topic), access_token })
    }

    pub fn topic_url(&self) -> &str {
        &self.topic_url
    }
}

fn topic_url(endpoint: &str, project_id: &str, topic: &str) -> String {
    format!("{}/v1/projects/{project_id}/topics/{topic}:publish", endpoint.trim_end_matches('/'))
}

#[async_trait]
impl SignalPublisher for PubSubPublisher {
    async fn publish(&self, payload: &SignalPayload) -> Result<(), PublishError> {
        let request = PublishRequest::for_signal(payload)?;
        let response = self
            .client
            .post(&self.topic_url)
            .bearer_auth(self.access_token.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|error| PublishError::Transport(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected { status: status.as_u16(), body });
        }

        debug!(
            event_name = "bus.signal.published",
            topic_url = %self.topic_url,
            human_messages = payload.human_messages.len(),
            bot_messages = payload.bot_messages.len(),
            "signal published"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use hakatabot_core::config::BusConfig;
    use hakatabot_core::domain::message::{ChatMessage, MessageOrigin, MessageTs};
    use hakatabot_core::signal::{PublishError, SignalPayload};
    use serde_json::{json, Value};

    use super::{PubSubPublisher, PublishRequest};

    fn payload() -> SignalPayload {
        SignalPayload {
            bot_messages: Vec::new(),
            human_messages: vec![ChatMessage {
                ts: MessageTs::from_micros(1_730_000_000_000_100),
                channel: "C-SANDBOX".to_owned(),
                user: Some("U1".to_owned()),
                text: "hello".to_owned(),
                origin: MessageOrigin::Human,
                username: None,
                thread_ts: None,
                hidden: false,
            }],
            last_signal: 1_729_990_000.5,
        }
    }

    #[test]
    fn request_wraps_base64_json_with_signal_attribute() {
        let request = PublishRequest::for_signal(&payload()).expect("encode");
        let json = serde_json::to_value(&request).expect("serialize");

        assert_eq!(json["messages"][0]["attributes"], json!({"type": "signal"}));

        let data = json["messages"][0]["data"].as_str().expect("data");
        let decoded: Value = serde_json::from_slice(&STANDARD.decode(data).expect("base64"))
            .expect("payload json");
        assert_eq!(decoded["lastSignal"], json!(1_729_990_000.5));
        assert_eq!(decoded["humanMessages"][0]["ts"], "1730000000.000100");
        assert_eq!(decoded["botMessages"], json!([]));
    }

    #[test]
    fn topic_url_is_built_from_bus_config() {
        let bus = BusConfig {
            enabled: true,
            endpoint: "https://pubsub.example.test/".to_owned(),
            project_id: Some("hakata".to_owned()),
            topic: "hakatabot".to_owned(),
            access_token: Some("token".to_owned().into()),
        };

        let publisher = PubSubPublisher::from_config(&bus).expect("publisher");

        assert_eq!(
            publisher.topic_url(),
            "https://pubsub.example.test/v1/projects/hakata/topics/hakatabot:publish"
        );
    }

    #[test]
    fn missing_project_is_rejected() {
        let bus = BusConfig {
            enabled: true,
            endpoint: "https://pubsub.example.test".to_owned(),
            project_id: None,
            topic: "hakatabot".to_owned(),
            access_token: Some("token".to_owned().into()),
        };

        assert!(matches!(PubSubPublisher::from_config(&bus), Err(PublishError::Transport(_))));
    }
}
