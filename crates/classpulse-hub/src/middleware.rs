//! HTTP guard rails for the API: per-caller rate limiting, optional API
//! key auth, and request logging. Limits and the key come from the server
//! configuration, not process globals, so two routers in one process can
//! carry different policies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::Mutex;
use tracing::info;

use classpulse_core::config::ServerSettings;

/// Sliding-window request counter, keyed per caller.
pub struct RateLimiter {
    hits: Mutex<HashMap<String, Vec<Instant>>>,
    max_per_window: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
            max_per_window,
            window,
        }
    }

    /// Record one hit for `caller` and report whether it fits the window.
    async fn allow(&self, caller: &str) -> bool {
        let mut hits = self.hits.lock().await;
        let now = Instant::now();
        let entry = hits.entry(caller.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);
        if entry.len() >= self.max_per_window {
            false
        } else {
            entry.push(now);
            true
        }
    }
}

/// Request policy shared by the router's routes, built from [`ServerSettings`].
pub struct ApiGuard {
    limiter: RateLimiter,
    api_key: Option<String>,
}

impl ApiGuard {
    pub fn new(settings: &ServerSettings) -> Self {
        Self {
            limiter: RateLimiter::new(
                settings.rate_limit_per_minute,
                Duration::from_secs(60),
            ),
            api_key: settings.api_key.clone(),
        }
    }
}

fn caller_key(headers: &HeaderMap) -> &str {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// With no key configured every request passes; otherwise the key must
/// arrive as `Authorization: Bearer <key>` or `X-API-Key: <key>`.
fn authorized(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = match auth.strip_prefix("Bearer ") {
        Some(bearer) => bearer,
        None => headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or(""),
    };
    token == expected
}

/// Auth and rate-limit checks, in that order.
pub async fn guard_middleware(
    State(guard): State<Arc<ApiGuard>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !authorized(&headers, guard.api_key.as_deref()) {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": "Invalid or missing API key. Set Authorization: Bearer <key> or X-API-Key: <key>"
            })),
        )
            .into_response();
    }

    if !guard.limiter.allow(caller_key(&headers)).await {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "error": format!(
                    "Rate limit exceeded. Max {} requests per minute.",
                    guard.limiter.max_per_window
                )
            })),
        )
            .into_response();
    }

    next.run(request).await
}

/// Request logging middleware.
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "request"
    );

    response
}
