use std::time::Duration;

use reqwest::{Client, Request};
use serde_json::Value;

// ── Constants ────────────────────────────────────────────────────────────────

/// Pause between the wake ping and the retry attempt.
const WAKE_BACKOFF: Duration = Duration::from_millis(1200);

// ── Public result type ───────────────────────────────────────────────────────

/// Outcome of one resilient fetch: HTTP status plus the body in both decoded
/// and raw form. `json` is `Some` only when `text` parsed as JSON; otherwise
/// `text` keeps the raw body for diagnostics.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub ok: bool,
    pub status: u16,
    pub json: Option<Value>,
    pub text: String,
    pub content_type: Option<String>,
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Fetch JSON with handling for free-tier backend hibernation (503 + empty
/// body). If encountered, pings `wake_url` to wake the backend, waits briefly,
/// and retries the original request exactly once.
///
/// Body-read and JSON-decode failures are absorbed into the outcome; only a
/// transport-level failure of the main request surfaces as `Err`.
pub async fn fetch_json_with_wake(
    client: &Client,
    request: Request,
    wake_url: Option<&str>,
) -> Result<FetchOutcome, reqwest::Error> {
    // Cloned up front so the retry replays the same method, headers and body.
    // Streaming bodies cannot be replayed and get no retry.
    let retry = request.try_clone();

    let mut outcome = do_fetch(client, request).await?;

    if is_dormancy_signature(&outcome) {
        tracing::warn!(status = outcome.status, "backend appears dormant, waking and retrying");
        if let Some(wake) = wake_url {
            // Fire and forget: the wake response is never inspected.
            let _ = client.get(wake).send().await;
        }
        tokio::time::sleep(WAKE_BACKOFF).await;
        if let Some(retry) = retry {
            outcome = do_fetch(client, retry).await?;
        }
    }

    Ok(outcome)
}

// ── Internals ────────────────────────────────────────────────────────────────

/// A 503 with an empty or whitespace-only body is the hibernation heuristic;
/// a 503 that carries a body is a real backend reply.
fn is_dormancy_signature(outcome: &FetchOutcome) -> bool {
    outcome.status == 503 && outcome.text.trim().is_empty()
}

async fn do_fetch(client: &Client, request: Request) -> Result<FetchOutcome, reqwest::Error> {
    let response = client.execute(request).await?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let text = response.text().await.unwrap_or_default();
    let json = parse_json_safe(&text);

    Ok(FetchOutcome {
        ok: status.is_success(),
        status: status.as_u16(),
        json,
        text,
        content_type,
    })
}

fn parse_json_safe(text: &str) -> Option<Value> {
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}
