use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use hakatabot_core::errors::{ApplicationError, InterfaceError};
use hakatabot_slack::client::{ChatClient, PostMessageRequest};
use hakatabot_slack::events::{normalize_event, EventContext, EventDispatcher};
use hakatabot_slack::signature::{
    SignatureVerifier, RETRY_NUM_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct IngressState {
    pub dispatcher: Arc<EventDispatcher>,
    pub chat: Arc<dyn ChatClient>,
    pub verifier: Arc<SignatureVerifier>,
}

pub fn router(state: IngressState) -> Router {
    Router::new().route("/slack/events", post(slack_events)).with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    correlation_id: &'a str,
}

#[derive(Debug)]
pub struct IngressRejection(pub InterfaceError);

impl From<InterfaceError> for IngressRejection {
    fn from(value: InterfaceError) -> Self {
        Self(value)
    }
}

impl IntoResponse for IngressRejection {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
        };
        let body =
            ErrorBody { error: self.0.user_message(), correlation_id: self.0.correlation_id() };
        (status, Json(body)).into_response()
    }
}

/// `POST /slack/events`. Every listener settles before the acknowledgement is
/// returned; listener and delivery failures are logged and still answered 200.
pub async fn slack_events(
    State(state): State<IngressState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, IngressRejection> {
    if let Err(error) = state.verifier.verify(
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        &body,
        Utc::now().timestamp(),
    ) {
        warn!(
            event_name = "slack.ingress.rejected",
            correlation_id = "unverified",
            error = %error,
            "request signature rejected"
        );
        return Err(ApplicationError::Authentication(error.to_string())
            .into_interface("unverified")
            .into());
    }

    if let Some(retry_num) = header(&headers, RETRY_NUM_HEADER) {
        info!(
            event_name = "slack.ingress.retry_acknowledged",
            correlation_id = "retry",
            retry_num,
            "redelivery acknowledged without dispatch"
        );
        return Ok(StatusCode::OK.into_response());
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|error| {
        ApplicationError::MalformedEvent(error.to_string()).into_interface("unparsed")
    })?;

    match payload.get("type").and_then(Value::as_str) {
        Some("url_verification") => {
            let challenge = payload.get("challenge").and_then(Value::as_str).ok_or_else(|| {
                ApplicationError::MalformedEvent("url_verification without challenge".to_owned())
                    .into_interface("url-verification")
            })?;
            Ok(Json(json!({ "challenge": challenge })).into_response())
        }
        Some("event_callback") => {
            deliver(&state, &payload).await;
            Ok(StatusCode::OK.into_response())
        }
        other => {
            debug!(
                event_name = "slack.ingress.ignored",
                correlation_id = "unknown",
                body_type = other.unwrap_or("-"),
                "unhandled body type acknowledged"
            );
            Ok(StatusCode::OK.into_response())
        }
    }
}

async fn deliver(state: &IngressState, payload: &Value) {
    let event_id = payload.get("event_id").and_then(Value::as_str);
    let correlation_id =
        event_id.map(str::to_owned).unwrap_or_else(|| Uuid::new_v4().to_string());

    let Some(event) = payload.get("event") else {
        warn!(
            event_name = "slack.ingress.malformed",
            correlation_id = %correlation_id,
            "event_callback without event"
        );
        return;
    };
    let envelope = match normalize_event(event_id.unwrap_or(&correlation_id), event) {
        Ok(envelope) => envelope,
        Err(error) => {
            warn!(
                event_name = "slack.ingress.malformed",
                correlation_id = %correlation_id,
                error = %error,
                "event could not be normalized"
            );
            return;
        }
    };

    let ctx = EventContext { correlation_id };
    let report = state.dispatcher.dispatch(&envelope, &ctx).await;

    for reply in &report.replies {
        if let Err(error) = state.chat.post_message(&PostMessageRequest::from(reply)).await {
            warn!(
                event_name = "slack.reply.failed",
                correlation_id = %ctx.correlation_id,
                channel = %reply.channel,
                error = %error,
                "reply could not be posted"
            );
        }
    }

    info!(
        event_name = "slack.ingress.dispatched",
        correlation_id = %ctx.correlation_id,
        event_type = envelope.event.event_type().as_str(),
        handled = report.handled,
        replies = report.replies.len(),
        failures = report.failures.len(),
        "event dispatched"
    );
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
