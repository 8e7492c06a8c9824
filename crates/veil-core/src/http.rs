//! Ambient HTTP layer shared by every service
//!
//! - `ApiError`: the JSON error shape `{"error": <message>}` with proper
//!   status codes
//! - `service_node`: middleware stamping `X-Service-Node` on every response
//!   and logging the request line with its duration

use axum::{
    extract::{Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use tracing::info;

/// Typed handler error rendered as `{"error": <message>}`
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

/// Middleware: tag the response with the originating component and emit the
/// access log line. Install with
/// `axum::middleware::from_fn_with_state(SERVICE_NAME, service_node)`.
pub async fn service_node(
    State(service): State<&'static str>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = std::time::Instant::now();

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert("x-service-node", HeaderValue::from_static(service));

    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
    info!(
        service,
        %method,
        %path,
        status = response.status().as_u16(),
        duration_ms,
        "request"
    );

    response
}
