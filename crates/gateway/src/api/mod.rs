//! The inbound HTTP surface.
//!
//! Chat connectors normalise their platform's events and POST them to
//! `/v1/inbound`; the reply (if any) comes back in the response for the
//! connector to post into the room. `/healthz` and `/v1/approvals`
//! exist for dashboards and probes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::commands::ChatEvent;
use crate::engine::Engine;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dedupe store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory idempotency store. Connectors retry webhooks; a retried
/// `event_id` must not dispatch the same command twice.
pub struct DedupeStore {
    seen: parking_lot::Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: parking_lot::Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns `true` if this event_id was already seen (duplicate).
    pub fn check_and_insert(&self, event_id: &str) -> bool {
        let mut map = self.seen.lock();
        let now = Instant::now();

        // Lazy cleanup when the map grows large.
        if map.len() > 10_000 {
            map.retain(|_, ts| now.duration_since(*ts) < self.ttl);
        }

        if let Some(ts) = map.get(event_id) {
            if now.duration_since(*ts) < self.ttl {
                return true;
            }
        }

        map.insert(event_id.to_owned(), now);
        false
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub room_id: String,
    pub sender: String,
    pub body: String,
    /// Idempotency key; duplicates within the TTL are dropped.
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InboundResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deduped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State + router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct ApiState {
    pub app: AppState,
    pub engine: Arc<Engine>,
    pub dedupe: Arc<DedupeStore>,
}

pub fn router(state: ApiState) -> axum::Router {
    axum::Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/inbound", post(inbound))
        .route("/v1/approvals", get(list_approvals))
        .with_state(state)
}

fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Bearer-token check against the startup-hashed API token.
/// No configured token = dev mode, everything passes.
fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.api_token_hash else {
        return true;
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) => Sha256::digest(token.as_bytes()).as_slice() == expected.as_slice(),
        None => false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /healthz — component health for probes and dashboards.
async fn healthz(State(state): State<ApiState>) -> impl IntoResponse {
    let pending = state.app.approvals.list_pending().len();
    Json(serde_json::json!({
        "status": "ok",
        "agents": state.app.agents.count(),
        "pending_approvals": pending,
        "nlp": state.app.nlp_health.get(),
    }))
}

/// POST /v1/inbound — one chat event in, at most one reply out.
async fn inbound(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Json<InboundEnvelope>,
) -> Response {
    if !authorized(&state.app, &headers) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing bearer token");
    }

    let envelope = body.0;
    if let Some(event_id) = &envelope.event_id {
        if state.dedupe.check_and_insert(event_id) {
            return Json(InboundResponse {
                accepted: true,
                deduped: true,
                reply: None,
            })
            .into_response();
        }
    }

    let event = ChatEvent {
        room_id: envelope.room_id,
        sender: envelope.sender,
        body: envelope.body,
        event_id: envelope.event_id,
    };
    let reply = state.engine.handle(&event).await;

    Json(InboundResponse {
        accepted: true,
        deduped: false,
        reply,
    })
    .into_response()
}

/// GET /v1/approvals — read-only listing for dashboards.
async fn list_approvals(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if !authorized(&state.app, &headers) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid or missing bearer token");
    }
    if let Err(e) = state.app.approvals.check_expiry() {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    let approvals = state.app.approvals.list();
    Json(serde_json::json!({
        "count": approvals.len(),
        "approvals": approvals,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
