//! Tower middleware for the AgentLens API.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::state::AppState;

/// Authenticates the bearer API key and inserts it into request extensions
/// for downstream handlers. Skipped for `/health` and `/api/stream`, which
/// accepts its token via query string instead (spec §6).
pub async fn auth_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Result<Response, ApiError> {
    let path = request.uri().path();
    if path == "/health" || path == "/api/stream" {
        return Ok(next.run(request).await);
    }
    if state.config().auth_disabled {
        return Ok(next.run(request).await);
    }

    let auth_header = request.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());
    let key = authenticate(&state.store(), auth_header).await?;
    state.record_tenant(&key.tenant_id).await;
    request.extensions_mut().insert(key);

    Ok(next.run(request).await)
}

/// Per-key token bucket plus monthly org quota check (spec §4.12). Runs
/// after auth so the authenticated key id is available; unauthenticated
/// requests (health, stream) pass through untouched.
pub async fn rate_limit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, ApiError> {
    let Some(key) = request.extensions().get::<agentlens_types::ApiKey>().cloned() else {
        return Ok(next.run(request).await);
    };

    state.key_rate_limiter().try_acquire(key.id, key.rate_limit).await?;
    match state.quota_checker().check(&key.tenant_id).await? {
        agentlens_engine::QuotaStatus::Blocked => {
            return Err(ApiError::Core(agentlens_types::AgentLensError::QuotaExceeded(
                "monthly event quota exceeded".into(),
            )));
        }
        agentlens_engine::QuotaStatus::Warning { .. } | agentlens_engine::QuotaStatus::Ok => {}
    }

    Ok(next.run(request).await)
}

/// Request tracing middleware: one `info_span!` per request, logged with
/// status and latency once the handler returns.
pub async fn tracing_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request.extensions().get::<RequestId>().map(|id| id.0.clone()).unwrap_or_else(|| "unknown".to_string());
    let tenant_id = request
        .extensions()
        .get::<agentlens_types::ApiKey>()
        .map(|k| k.tenant_id.clone())
        .unwrap_or_else(|| "anonymous".to_string());

    let span = tracing::info_span!(
        "http_request",
        method = %method,
        path = %path,
        request_id = %request_id,
        tenant_id = %tenant_id,
        status = tracing::field::Empty,
        latency_ms = tracing::field::Empty,
    );

    let response = {
        let _enter = span.enter();
        next.run(request).await
    };

    let latency = start.elapsed();
    let status = response.status();
    tracing::info!(
        method = %method,
        path = %path,
        status = %status.as_u16(),
        latency_ms = %latency.as_millis(),
        "request completed"
    );

    response
}

/// Request ID middleware
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    response.headers_mut().insert("X-Request-ID", request_id.parse().unwrap());
    response
}

/// Request ID wrapper
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// CORS layer driven by `EngineConfig::cors_origin` (spec §6 "CORS origin").
/// Falls back to a restrictive same-origin default when unset.
pub fn cors_layer(cors_origin: Option<&str>) -> tower_http::cors::CorsLayer {
    use tower_http::cors::{AllowOrigin, CorsLayer};

    let allow_origin = match cors_origin {
        Some(origin) if !origin.is_empty() => match origin.parse() {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!(origin, "invalid CORS origin, using restrictive default");
                AllowOrigin::exact("https://localhost".parse().unwrap())
            }
        },
        _ => AllowOrigin::exact("https://localhost".parse().unwrap()),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT, "x-webhook-signature".parse().unwrap()])
        .max_age(std::time::Duration::from_secs(3600))
}

/// Timeout layer helper
#[allow(deprecated)]
pub fn timeout_layer(duration: std::time::Duration) -> tower_http::timeout::TimeoutLayer {
    tower_http::timeout::TimeoutLayer::new(duration)
}

/// Request body size limit
pub fn body_limit_layer(limit: usize) -> tower_http::limit::RequestBodyLimitLayer {
    tower_http::limit::RequestBodyLimitLayer::new(limit)
}

/// Security headers middleware: standard hardening headers on every response.
pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Content-Type-Options", "nosniff".parse().unwrap());
    headers.insert("X-Frame-Options", "DENY".parse().unwrap());
    headers.insert("X-XSS-Protection", "1; mode=block".parse().unwrap());
    headers.insert("Content-Security-Policy", "default-src 'self'; frame-ancestors 'none'".parse().unwrap());
    if std::env::var("AGENTLENS_ENABLE_HSTS").is_ok() {
        headers.insert("Strict-Transport-Security", "max-age=31536000; includeSubDomains".parse().unwrap());
    }
    headers.insert("Referrer-Policy", "strict-origin-when-cross-origin".parse().unwrap());
    headers.insert("Permissions-Policy", "geolocation=(), microphone=(), camera=()".parse().unwrap());

    response
}

#[cfg(test)]
mod tests {
    #[test]
    fn request_ids_are_unique() {
        let id1 = uuid::Uuid::new_v4().to_string();
        let id2 = uuid::Uuid::new_v4().to_string();
        assert_ne!(id1, id2);
    }
}
