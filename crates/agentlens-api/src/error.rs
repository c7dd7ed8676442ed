//! HTTP error mapping (spec §7): the core's `AgentLensError` taxonomy, mapped
//! to a status code and a uniform `{error, status, details?}` body. Retry
//! hints live in headers, never only in the body.

use agentlens_types::AgentLensError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] AgentLensError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after, details) = match &self {
            ApiError::Core(AgentLensError::Validation { message, details }) => (
                StatusCode::BAD_REQUEST,
                message.clone(),
                None,
                Some(serde_json::json!(details)),
            ),
            ApiError::Core(AgentLensError::Auth(msg)) => (StatusCode::UNAUTHORIZED, msg.clone(), None, None),
            ApiError::Core(AgentLensError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone(), None, None),
            ApiError::Core(AgentLensError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone(), None, None),
            ApiError::Core(AgentLensError::RateLimited { retry_after_secs }) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate limited".to_string(),
                Some(*retry_after_secs),
                None,
            ),
            ApiError::Core(AgentLensError::QuotaExceeded(msg)) => {
                (StatusCode::TOO_MANY_REQUESTS, msg.clone(), None, None)
            }
            ApiError::Core(AgentLensError::Backpressure { retry_after_secs }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream capacity exhausted".to_string(),
                Some(*retry_after_secs),
                None,
            ),
            ApiError::Core(AgentLensError::Storage(msg)) => {
                tracing::error!(error = %msg, "storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None, None)
            }
            ApiError::Core(AgentLensError::Dependency(msg)) => {
                tracing::warn!(error = %msg, "dependency error");
                (StatusCode::SERVICE_UNAVAILABLE, msg.clone(), None, None)
            }
            ApiError::Core(AgentLensError::Corruption(msg)) => {
                tracing::error!(error = %msg, "hash chain corruption detected on read");
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), None, None)
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None, None),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None, None),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None, None),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string(), None, None)
            }
        };

        let body = ErrorResponse { error: message, status: status.as_u16(), details };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("invalid JSON: {e}"))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(e: std::io::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentlens_types::ErrorDetail;
    use axum::body::Body;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn validation_error_surfaces_details_and_400() {
        let err = ApiError::Core(AgentLensError::Validation {
            message: "bad event".into(),
            details: vec![ErrorDetail { field: "eventType".into(), message: "unknown".into() }],
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["details"][0]["field"], "eventType");
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after_header() {
        let err = ApiError::Core(AgentLensError::RateLimited { retry_after_secs: 42 });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "42");
    }

    #[test]
    fn unused_body_import_keeps_clippy_quiet() {
        let _ = Body::empty();
    }
}
