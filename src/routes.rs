use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use url::Url;

use crate::http::{fetch_json_with_wake, FetchOutcome};
use crate::models::{DebugParseRequest, ParsePayload, UpdateSdsRequest};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = "sds-gateway-api/1.0";

/// Deadline for one forwarded parse, covering the wake cycle and retry.
const PARSE_TIMEOUT: Duration = Duration::from_secs(300);

// ── Shared state ─────────────────────────────────────────────────────────────

/// Read-only per-process configuration handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub backend_url: Option<String>,
    pub client: reqwest::Client,
    pub parse_timeout: Duration,
}

impl AppState {
    pub fn new(backend_url: Option<String>) -> Self {
        let client = reqwest::ClientBuilder::new()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build http client");

        Self {
            backend_url,
            client,
            parse_timeout: PARSE_TIMEOUT,
        }
    }

    pub fn from_env() -> Self {
        let backend_url = std::env::var("BACKEND_URL")
            .ok()
            .and_then(|raw| normalize_backend_url(&raw));
        Self::new(backend_url)
    }

    /// Shorten the forwarding deadline. Tests use this to exercise the
    /// timeout path without waiting out the real five minutes.
    pub fn with_parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = timeout;
        self
    }
}

/// Trim and validate the configured backend base URL. An unusable value is
/// treated the same as an unset one.
fn normalize_backend_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(trimmed.to_string()),
        _ => {
            tracing::warn!(value = raw, "BACKEND_URL is not a valid http(s) URL, ignoring");
            None
        }
    }
}

// ── Router ───────────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/update-sds", post(update_sds))
        .route("/api/debug-sds-parse", post(debug_sds_parse))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Forwarding seam ──────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum ForwardError {
    #[error("Parse timed out")]
    TimedOut,
    #[error("{0}")]
    Transport(String),
}

/// POST the payload to `<backend>/parse-sds`, with `<backend>/health` as the
/// wake target. The deadline bounds the whole call, wake cycle included, and
/// is disarmed on every exit path by scoping.
async fn forward_parse(
    state: &AppState,
    backend_url: &str,
    payload: &ParsePayload,
) -> Result<FetchOutcome, ForwardError> {
    let parse_url = format!("{}/parse-sds", backend_url);
    let wake_url = format!("{}/health", backend_url);

    let request = state
        .client
        .post(&parse_url)
        .json(payload)
        .build()
        .map_err(|e| ForwardError::Transport(e.to_string()))?;

    match tokio::time::timeout(
        state.parse_timeout,
        fetch_json_with_wake(&state.client, request, Some(&wake_url)),
    )
    .await
    {
        Err(_) => Err(ForwardError::TimedOut),
        Ok(Err(e)) => Err(ForwardError::Transport(e.to_string())),
        Ok(Ok(outcome)) => Ok(outcome),
    }
}

/// The backend reply as a JSON value: the decoded body, or the raw text under
/// `raw_key` when the body was not valid JSON.
fn decoded_or_raw(outcome: &FetchOutcome, raw_key: &str) -> Value {
    match &outcome.json {
        Some(value) => value.clone(),
        None => {
            let mut map = Map::new();
            map.insert(raw_key.to_string(), Value::String(outcome.text.clone()));
            Value::Object(map)
        }
    }
}

/// Best-effort error message from a backend reply: its `error` field, then
/// the raw-body field, then a generic fallback. Empty strings do not count.
fn backend_error_message(data: &Value, raw_key: &str, fallback: &str) -> String {
    for key in ["error", raw_key] {
        if let Some(msg) = data.get(key).and_then(Value::as_str) {
            if !msg.is_empty() {
                return msg.to_string();
            }
        }
    }
    fallback.to_string()
}

fn error_reply(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ── POST /api/update-sds ─────────────────────────────────────────────────────

/// Forward a parse command and relay the outcome. The body is parsed here
/// rather than by an extractor so malformed input still yields the JSON error
/// envelope instead of the framework's default reply.
async fn update_sds(State(state): State<AppState>, body: Bytes) -> Response {
    let req: UpdateSdsRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    };

    let Some(backend_url) = state.backend_url.clone() else {
        return error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Backend URL not configured");
    };

    let payload = ParsePayload {
        product_id: req.product_id,
        sds_url: req.pdf_url,
        force: false,
        debug: None,
    };

    let outcome = match forward_parse(&state, &backend_url, &payload).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, product_id = payload.product_id, "parse forward failed");
            return error_reply(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string());
        }
    };

    let data = decoded_or_raw(&outcome, "raw");

    if !outcome.ok {
        let message = backend_error_message(&data, "raw", "Failed to trigger parse");
        let status =
            StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return error_reply(status, &message);
    }

    // Flatten the backend's fields next to the success flag so callers can
    // read backend-specific keys (updated row ids etc.) without a fixed
    // schema. Backend keys win on collision.
    let mut reply = Map::new();
    reply.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(fields) = data {
        for (key, value) in fields {
            reply.insert(key, value);
        }
    }

    (StatusCode::OK, Json(Value::Object(reply))).into_response()
}

// ── POST /api/debug-sds-parse ────────────────────────────────────────────────

/// Forward the same parse command but always reply 200 with a diagnostic
/// envelope carrying the request and response verbatim, so backend behavior
/// can be inspected from the browser without log access.
async fn debug_sds_parse(State(state): State<AppState>, body: Bytes) -> Response {
    let req: DebugParseRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return debug_failure_reply(&e.to_string()),
    };

    let Some(backend_url) = state.backend_url.clone() else {
        return error_reply(StatusCode::INTERNAL_SERVER_ERROR, "Backend URL not configured");
    };

    let sds_url = match req.sds_url {
        Some(url) if !url.is_empty() => url,
        _ => return error_reply(StatusCode::BAD_REQUEST, "SDS URL is required for debugging"),
    };

    // Debug runs force a re-parse unless the caller explicitly opts out.
    let payload = ParsePayload {
        product_id: req.product_id,
        sds_url,
        force: req.force.unwrap_or(true),
        debug: Some(true),
    };

    let outcome = match forward_parse(&state, &backend_url, &payload).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, product_id = payload.product_id, "debug parse forward failed");
            return debug_failure_reply(&e.to_string());
        }
    };

    let response_data = decoded_or_raw(&outcome, "raw_response");

    let mut envelope = Map::new();
    envelope.insert("success".to_string(), Value::Bool(outcome.ok));
    envelope.insert("status_code".to_string(), Value::from(outcome.status));
    envelope.insert(
        "backend_url".to_string(),
        Value::String(format!("{}/parse-sds", backend_url)),
    );
    envelope.insert(
        "request_payload".to_string(),
        serde_json::to_value(&payload).unwrap_or(Value::Null),
    );
    if !outcome.ok {
        let message = backend_error_message(&response_data, "raw_response", "Backend request failed");
        envelope.insert("error".to_string(), Value::String(message));
    }
    envelope.insert("response_data".to_string(), response_data);
    envelope.insert("timestamp".to_string(), Value::String(now_rfc3339()));

    (StatusCode::OK, Json(Value::Object(envelope))).into_response()
}

fn debug_failure_reply(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": message,
            "timestamp": now_rfc3339(),
            "debug": true,
        })),
    )
        .into_response()
}
