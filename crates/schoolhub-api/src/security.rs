use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Method, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::ApiError;
use crate::request_meta::{REQUEST_ID_HEADER, RequestMeta};
use crate::state::AppState;
use crate::token::{Role, TokenPayload};

// Past this many tracked clients, idle entries are swept on the next hit.
const SWEEP_THRESHOLD: usize = 10_000;

/// Identity attached to requests that passed [`require_auth`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub school_id: Uuid,
    pub role: Role,
}

impl From<TokenPayload> for AuthUser {
    fn from(p: TokenPayload) -> Self {
        Self {
            user_id: p.user_id,
            email: p.email,
            school_id: p.school_id,
            role: p.role,
        }
    }
}

/// Sliding-window request counter keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    window: Duration,
    max_hits: usize,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> Self {
        Self {
            window: cfg.window,
            max_hits: cfg.max_hits,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut map = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        if map.len() > SWEEP_THRESHOLD {
            let window = self.window;
            map.retain(|_, q| q.back().is_some_and(|t| now.duration_since(*t) <= window));
        }

        let q = map.entry(key.to_string()).or_default();
        while q
            .front()
            .is_some_and(|t| now.duration_since(*t) > self.window)
        {
            q.pop_front();
        }
        if q.len() >= self.max_hits {
            return false;
        }
        q.push_back(now);
        true
    }
}

fn is_unsafe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn origin_is_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    // No Origin means a non-browser client (curl, mobile app).
    let origin = match headers.get(axum::http::header::ORIGIN) {
        Some(v) => match v.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        },
        None => return true,
    };
    allowed.iter().any(|a| a == origin)
}

fn client_ip(req: &Request<Body>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

fn client_key(req: &Request<Body>) -> String {
    client_ip(req)
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| "anon".to_string())
}

/// Assign a request id, run the request inside a span carrying it, and echo
/// it back in the response headers.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let meta = RequestMeta::from_headers(req.headers()).with_client_ip(client_ip(&req));
    let id = meta.request_id.clone();
    let span = tracing::info_span!(
        "request",
        request_id = %id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    req.extensions_mut().insert(meta);

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

/// Reject state-changing browser requests from origins outside the allowlist.
pub async fn origin_guard(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if is_unsafe_method(req.method())
        && !origin_is_allowed(req.headers(), &state.config.allowed_origins)
    {
        return ApiError::Forbidden("origin not allowed".into()).into_response();
    }
    next.run(req).await
}

pub async fn rate_limit(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let key = client_key(&req);
    if !state.limiter.allow(&key) {
        tracing::info!(client = %key, "rate limited");
        return ApiError::RateLimited.into_response();
    }
    next.run(req).await
}

/// Bearer access-token gate for protected routes. Fails closed.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let sessions = state.sessions()?;
    let TypedHeader(Authorization(bearer)) = bearer.ok_or(ApiError::Unauthorized)?;

    let payload = sessions.verify_access(bearer.token())?;
    req.extensions_mut().insert(AuthUser::from(payload));
    Ok(next.run(req).await)
}
