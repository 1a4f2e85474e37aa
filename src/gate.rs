// rate limit middleware for axum routes

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::MethodRouter,
};
use chrono::SecondsFormat;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use crate::backoff::ViolationBackoff;
use crate::error::error_body;
use crate::metrics::GATE_DECISIONS;
use crate::rate_limit::{FixedWindowLimiter, RateLimitDecision, RateLimitOptions};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

pub struct RateLimitGate {
    // route label for metrics and logs
    name: &'static str,
    options: RateLimitOptions,
    limiter: Arc<FixedWindowLimiter>,
    backoff: Option<Arc<ViolationBackoff>>,
}

impl RateLimitGate {
    pub fn new(
        name: &'static str,
        options: RateLimitOptions,
        limiter: Arc<FixedWindowLimiter>,
        backoff: Arc<ViolationBackoff>,
    ) -> Self {
        let backoff = options.backoff.then_some(backoff);
        Self {
            name,
            options,
            limiter,
            backoff,
        }
    }

    pub async fn decide(&self, client: &str, path: &str) -> RateLimitDecision {
        let resource = self.options.resource(path);
        let decision = self.limiter.check(client, resource, &self.options).await;

        match &self.backoff {
            Some(backoff) => backoff.apply(client, decision).await,
            None => decision,
        }
    }
}

// first of `X-Forwarded-For`, `X-Real-IP`, peer address
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|h| h.to_str().ok())
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        })
        .map(|s| s.to_string())
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn request_client(request: &Request) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    client_identifier(request.headers(), peer)
}

pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));

    let reset = decision
        .reset_time
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    if let Ok(val) = HeaderValue::from_str(&reset) {
        headers.insert(X_RATELIMIT_RESET, val);
    }

    if let Some(retry_after) = decision.retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    }
}

pub fn rejection(message: &str, decision: &RateLimitDecision) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(error_body(message))).into_response();
    apply_headers(response.headers_mut(), decision);
    response
}

pub async fn enforce(
    State(gate): State<Arc<RateLimitGate>>,
    request: Request,
    next: Next,
) -> Response {
    let client = request_client(&request);
    let path = request.uri().path().to_string();

    let decision = gate.decide(&client, &path).await;

    if decision.allowed {
        GATE_DECISIONS.with_label_values(&[gate.name, "allowed"]).inc();
        let mut response = next.run(request).await;
        apply_headers(response.headers_mut(), &decision);
        response
    } else {
        GATE_DECISIONS.with_label_values(&[gate.name, "denied"]).inc();
        warn!(
            client = %client,
            route = gate.name,
            retry_after = decision.retry_after,
            violations = decision.violation_count,
            "Rate limit exceeded"
        );
        rejection(&gate.options.message, &decision)
    }
}

// put `gate` in front of every method on `route`
pub fn wrap<S>(route: MethodRouter<S>, gate: RateLimitGate) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.layer(middleware::from_fn_with_state(Arc::new(gate), enforce))
}
