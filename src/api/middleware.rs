//! API Middleware
//!
//! Request logging.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

/// Header carrying the request id set by `SetRequestIdLayer`
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Headers whose values never reach the logs
pub const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization"];

/// Mask sensitive header values for logging
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

/// Request id of a request, if one was assigned
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// =========================================================================
// Request Logging Middleware
// =========================================================================

/// Request logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let version = request.version();

    let headers = mask_headers_for_logging(request.headers());
    let request_id = request_id(request.headers());

    let start = std::time::Instant::now();

    tracing::debug!(
        method = %method,
        uri = %uri,
        version = ?version,
        request_id = ?request_id,
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
        request_id = ?request_id,
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
        headers.insert("authorization", "Bearer abc".parse().unwrap());

        let masked = mask_headers_for_logging(&headers);

        let auth = masked.iter().find(|(k, _)| k == "authorization");
        let content_type = masked.iter().find(|(k, _)| k == "content-type");

        assert_eq!(auth.unwrap().1, "[REDACTED]");
        assert_eq!(content_type.unwrap().1, "application/json");
    }

    #[test]
    fn test_request_id() {
        let mut headers = HeaderMap::new();
        assert!(request_id(&headers).is_none());

        headers.insert(REQUEST_ID_HEADER, "abc-123".parse().unwrap());
        assert_eq!(request_id(&headers).as_deref(), Some("abc-123"));
    }
}
