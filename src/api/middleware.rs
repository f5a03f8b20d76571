//! API Middleware
//!
//! Operation-context extraction, edge rate limiting, and request logging.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use uuid::Uuid;

use crate::domain::OperationContext;
use crate::ratelimit::RateLimitStatus;

use super::AppState;

/// Build the operation context from request headers and stash it in the
/// request extensions for handlers and downstream middleware.
pub async fn context_middleware(mut request: Request<Body>, next: Next) -> Response {
    let headers = request.headers();

    let mut context = OperationContext::new();

    if let Some(device_id) = header_str(headers, "x-device-id") {
        context = context.with_device(device_id);
    }
    if let Some(location) = header_str(headers, "x-location") {
        context = context.with_location(location);
    }
    if let Some(token) = header_str(headers, "x-session-token") {
        context = context.with_session_token(token);
    }
    if let Some(ip) = client_ip(headers) {
        context = context.with_client_ip(ip);
    }

    let correlation_id = header_str(headers, "x-correlation-id")
        .and_then(|s| Uuid::parse_str(&s).ok())
        .unwrap_or_else(Uuid::new_v4);
    context = context.with_correlation_id(correlation_id);

    request.extensions_mut().insert(context);

    next.run(request).await
}

/// First address in X-Forwarded-For, if parseable.
fn client_ip(headers: &HeaderMap) -> Option<std::net::IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Edge rate limiting, keyed per caller (device id if supplied, else
/// client IP). Every request counts as one attempt against the window.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, Response> {
    let caller = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| {
            ctx.device_id
                .clone()
                .or_else(|| ctx.client_ip.map(|ip| ip.to_string()))
        })
        .unwrap_or_else(|| "anonymous".to_string());

    let key = format!("api:{caller}");
    let status = match state
        .rate_limiter
        .increment(&key, state.config.api_rate_limit)
        .await
    {
        Ok(status) => status,
        Err(e) => {
            tracing::error!(error = %e, "Rate limit check failed");
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Rate limit check failed",
                    "error_code": "storage_error"
                })),
            )
                .into_response());
        }
    };

    if let RateLimitStatus::Locked { until } = status {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded",
                "error_code": "rate_limit_exceeded",
                "lockout_until": until,
            })),
        )
            .into_response());
    }

    Ok(next.run(request).await)
}

/// Headers that should be masked in logs
const SENSITIVE_HEADERS: &[&str] = &["x-session-token", "authorization", "cookie", "set-cookie"];

/// Mask sensitive headers for logging
pub fn mask_headers_for_logging(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name_lower = name.as_str().to_lowercase();
            let masked_value = if SENSITIVE_HEADERS.contains(&name_lower.as_str()) {
                "[REDACTED]".to_string()
            } else {
                value.to_str().unwrap_or("[invalid utf8]").to_string()
            };
            (name.to_string(), masked_value)
        })
        .collect()
}

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let headers = mask_headers_for_logging(request.headers());

    let correlation_id = request
        .extensions()
        .get::<OperationContext>()
        .and_then(|ctx| ctx.correlation_id);

    let start = std::time::Instant::now();

    tracing::info!(
        method = %method,
        uri = %uri,
        correlation_id = ?correlation_id,
        headers = ?headers,
        "Incoming request"
    );

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %duration.as_millis(),
        correlation_id = ?correlation_id,
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_headers_for_logging() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-session-token", "secret-token-12345".parse().unwrap());
        headers.insert("x-device-id", "dev-123".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let token = masked.iter().find(|(k, _)| k == "x-session-token");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");
        let device = masked.iter().find(|(k, _)| k == "x-device-id");

        assert_eq!(token.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
        assert_eq!(device.unwrap().1, "dev-123");
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(
            client_ip(&headers),
            Some("203.0.113.7".parse().unwrap())
        );

        let empty = HeaderMap::new();
        assert_eq!(client_ip(&empty), None);
    }

    #[test]
    fn test_sensitive_headers_list() {
        assert!(SENSITIVE_HEADERS.contains(&"x-session-token"));
        assert!(SENSITIVE_HEADERS.contains(&"authorization"));
        assert!(!SENSITIVE_HEADERS.contains(&"x-device-id"));
    }
}
