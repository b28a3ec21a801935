use crate::models::ApiError;
use crate::session::SessionStore;
use crate::supabase::auth::User;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

/// Resolves bearer tokens to users and applies the per-user rate limit.
#[derive(Clone)]
pub struct SessionGate {
    sessions: Arc<SessionStore>,
    limiter: Arc<TokenBuckets>,
}

/// Inserted into request extensions for routes behind [`require_session`].
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: User,
    pub access_token: String,
}

impl SessionGate {
    pub fn new(sessions: Arc<SessionStore>, limiter: TokenBuckets) -> Self {
        Self {
            sessions,
            limiter: Arc::new(limiter),
        }
    }
}

pub async fn require_session(
    State(gate): State<SessionGate>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(token) = extract_bearer(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_token",
            "Provide Authorization: Bearer <access token>",
        ));
    };

    let user = match gate.sessions.authenticate(&token).await {
        Ok(user) => user,
        Err(err) if err.is_unauthorized() => {
            debug!(target = "bicimarket.api", error = %err, "token rejected");
            return Ok(error_response(
                StatusCode::UNAUTHORIZED,
                "invalid_token",
                "Session expired or not recognized",
            ));
        }
        Err(err) => {
            warn!(target = "bicimarket.api", error = %err, "token check failed");
            return Ok(error_response(
                StatusCode::BAD_GATEWAY,
                "auth_unavailable",
                "Could not verify the session",
            ));
        }
    };

    match gate.limiter.consume(&user.id.to_string()).await {
        Ok(permit) => {
            request.extensions_mut().insert(AuthContext {
                user,
                access_token: token,
            });
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

pub fn extract_bearer(headers: &http::HeaderMap) -> Option<String> {
    let raw = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = raw[6..].trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

pub struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl TokenBuckets {
    pub fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::new(rate_per_sec, capacity)
    }

    pub async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        // A bucket that has refilled completely is no different from a fresh one.
        guard.retain(|owner, state| owner == key || self.refilled(state, now) < self.capacity);
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        state.tokens = self.refilled(state, now);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        } else {
            let deficit = 1.0 - state.tokens;
            Err(RateExceeded {
                retry_after: (deficit / self.rate_per_sec).max(0.0),
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        }
    }

    fn refilled(&self, state: &BucketState, now: Instant) -> f64 {
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * self.rate_per_sec).min(self.capacity)
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone)]
pub struct RatePermit {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

fn header_number(value: u64) -> HeaderValue {
    HeaderValue::from(value)
}

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.tokens.max(0.0).floor() as u64;
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert("X-RateLimit-Limit", header_number(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", header_number(remaining));
        headers.insert("X-RateLimit-Reset", header_number(reset));
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded {
    retry_after: f64,
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = self.retry_after.ceil().max(1.0) as u64;
        let reset = ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64;
        headers.insert(http::header::RETRY_AFTER, header_number(retry));
        headers.insert("X-RateLimit-Limit", header_number(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        headers.insert("X-RateLimit-Reset", header_number(reset));
    }
}
