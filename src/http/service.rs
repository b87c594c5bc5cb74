//! HTTP handlers and the rate-limit middleware.
//!
//! The middleware protects any route that has a policy. Routes without a
//! policy pass through untouched. Admitted responses carry the usual
//! `X-RateLimit-*` headers; denied requests get `429 Too Many Requests` with
//! a JSON body and `Retry-After`.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::GateState;
use crate::ratelimit::{RateLimitKey, Verdict, UNKNOWN_IDENTITY};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
/// Seconds until the current window resets.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub policies: usize,
}

/// Forward-auth check request.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Client address as seen by the calling proxy
    #[serde(default)]
    pub ip: Option<String>,
    /// Target path of the request being checked
    pub path: String,
}

/// Forward-auth check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Whole seconds, rounded up, so clients never retry early.
fn ceil_secs(duration: Duration) -> u64 {
    let ms = duration.as_millis() as u64;
    ms.div_ceil(1000)
}

fn set_rate_limit_headers(headers: &mut HeaderMap, verdict: &Verdict, reset_secs: u64) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(verdict.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(verdict.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_secs));
}

/// Apply the gate to requests whose path has a policy.
pub async fn rate_limit(
    State(state): State<Arc<GateState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_owned();

    let Some(policy) = state.policy_for(&path) else {
        return next.run(request).await;
    };

    let key = state.resolver().key_for(request.headers(), &path);
    let verdict = state.gate().check_key(&key, &policy.window);
    let reset_secs = ceil_secs(verdict.retry_after(state.gate().now_ms()));

    if !verdict.admitted {
        info!(
            key = %key,
            policy = %policy.name,
            retry_after_secs = reset_secs,
            "Request rate limited"
        );

        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: policy.message.clone(),
                code: "RATE_LIMITED".to_string(),
                retry_after_secs: Some(reset_secs),
            }),
        )
            .into_response();

        let headers = response.headers_mut();
        set_rate_limit_headers(headers, &verdict, reset_secs);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(reset_secs));
        return response;
    }

    debug!(key = %key, remaining = verdict.remaining, "Request admitted");

    let mut response = next.run(request).await;
    set_rate_limit_headers(response.headers_mut(), &verdict, reset_secs);
    response
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<GateState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        policies: state.policy_count(),
    })
}

/// Decide on behalf of a proxy whether a request may proceed.
///
/// Always answers `200` with the decision in the body so the proxy can read
/// it; only a malformed request gets `400`.
pub async fn check(
    State(state): State<Arc<GateState>>,
    Json(req): Json<CheckRequest>,
) -> (StatusCode, Json<CheckResponse>) {
    if req.path.is_empty() {
        warn!("Received check request with empty path");
        return (
            StatusCode::BAD_REQUEST,
            Json(CheckResponse {
                allowed: false,
                reason: Some("path is required".to_string()),
                limit: None,
                remaining: None,
                retry_after_secs: None,
            }),
        );
    }

    let Some(policy) = state.policy_for(&req.path) else {
        debug!(path = %req.path, "No policy for path");
        return (
            StatusCode::OK,
            Json(CheckResponse {
                allowed: true,
                reason: None,
                limit: None,
                remaining: None,
                retry_after_secs: None,
            }),
        );
    };

    let identity = req
        .ip
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(UNKNOWN_IDENTITY);
    let key = RateLimitKey::new(identity, &req.path);
    let verdict = state.gate().check_key(&key, &policy.window);

    let response = if verdict.admitted {
        CheckResponse {
            allowed: true,
            reason: None,
            limit: Some(verdict.limit),
            remaining: Some(verdict.remaining),
            retry_after_secs: None,
        }
    } else {
        let retry = ceil_secs(verdict.retry_after(state.gate().now_ms()));
        info!(key = %key, policy = %policy.name, retry_after_secs = retry, "Check denied");
        CheckResponse {
            allowed: false,
            reason: Some(policy.message),
            limit: Some(verdict.limit),
            remaining: Some(0),
            retry_after_secs: Some(retry),
        }
    };

    (StatusCode::OK, Json(response))
}

/// Terminal handler for requests the gate let through.
pub async fn admitted() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "admitted" }))
}
