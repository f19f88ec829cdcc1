//! HTTP middleware: CORS, security headers, response timing, panic fallback.

use axum::body::Body as AxumBody;
use axum::http::{HeaderValue, Request};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use std::any::Any;
use std::time::Instant;
use tower_http::cors::{self, AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, error, warn};

use crate::error::{ApiError, GENERIC_FAILURE};

pub const RESPONSE_TIME_HEADER: &str = "response-time";

/// `*` allows any origin without credentials; otherwise a comma separated list.
pub fn build_cors_layer(cors_origins: &str) -> Option<CorsLayer> {
    if cors_origins.trim() == "*" {
        return Some(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods(cors::Any)
                .allow_headers(cors::Any),
        );
    }

    let origins = cors_origins
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            // Wildcards are not allowed alongside credentials.
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true),
    )
}

/// Adds baseline security headers.
pub async fn add_security_headers(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        axum::http::header::X_FRAME_OPTIONS,
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        axum::http::header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

/// Stamps the handler duration, in seconds, on every response.
pub async fn add_response_time(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(request).await;
    let elapsed = started.elapsed().as_secs_f64();
    if let Ok(value) = HeaderValue::from_str(&elapsed.to_string()) {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, value);
    }
    debug!(elapsed, "route duration");
    response
}

/// Last resort for panicking handlers: log and answer with the generic message.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else {
        "unknown panic"
    };
    error!(detail, "handler panicked");
    ApiError::Internal(GENERIC_FAILURE.into()).into_response()
}
