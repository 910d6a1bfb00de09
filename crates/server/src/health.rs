use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use hakatabot_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    listeners: Vec<&'static str>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StoreCheck {
    pub status: &'static str,
    pub detail: String,
    pub documents: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub state_store: StoreCheck,
    pub listeners: Vec<&'static str>,
    pub detector_enabled: bool,
    pub checked_at: String,
}

/// `GET /health`: 200 once the migrated `states` table answers, 503 otherwise.
pub fn router(db_pool: DbPool, listeners: Vec<&'static str>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, listeners })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let state_store = state_store_check(&state.db_pool).await;
    let ready = state_store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        detector_enabled: state.listeners.contains(&"signal_detector"),
        listeners: state.listeners,
        state_store,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

// Counting rows fails on an unmigrated database as well as an unreachable one.
async fn state_store_check(pool: &DbPool) -> StoreCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM states").fetch_one(pool).await {
        Ok(count) => StoreCheck {
            status: "ready",
            detail: "state documents readable".to_string(),
            documents: Some(count),
        },
        Err(error) => StoreCheck {
            status: "degraded",
            detail: format!("state store unavailable: {error}"),
            documents: None,
        },
    }
}
