use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use crate::api::error_response;
use rand::Rng;
use std::fmt::Write;
use std::time::Instant;

/// Response header echoing the request's trace ID.
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Newtype wrapper for trace IDs stored in request extensions.
#[derive(Clone)]
pub struct TraceId(pub String);

impl std::ops::Deref for TraceId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

/// Generate a 16-character hex trace ID (8 random bytes).
fn generate_trace_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    let mut s = String::with_capacity(16);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Maximum number of characters to log from request/response body.
const MAX_BODY_LOG_CHARS: usize = 200;

/// Largest accepted request body; matches axum's default `Json` body limit.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Truncate a UTF-8 string to at most `max` bytes, snapping to the nearest
/// char boundary so we never split a multi-byte character.
fn truncate_body(bytes: &[u8], max: usize) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.len() > max => {
            let mut end = max;
            while end > 0 && !s.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &s[..end])
        }
        Ok(s) => s.to_string(),
        Err(_) => "<non-utf8 body>".to_string(),
    }
}

/// Format elapsed time as a human-readable string.
fn format_elapsed(elapsed_us: u128) -> String {
    if elapsed_us < 1000 {
        format!("{elapsed_us}µs")
    } else if elapsed_us < 1_000_000 {
        format!("{}ms", elapsed_us / 1000)
    } else {
        format!("{:.1}s", elapsed_us as f64 / 1_000_000.0)
    }
}

fn log_response(trace_id: &str, status: StatusCode, elapsed: &str, body: &str) {
    let status_code = status.as_u16();
    if status.is_server_error() {
        tracing::error!(trace_id = %trace_id, status = status_code, elapsed = %elapsed, body = %body, "<-- response");
    } else if status.is_client_error() {
        tracing::warn!(trace_id = %trace_id, status = status_code, elapsed = %elapsed, body = %body, "<-- response");
    } else {
        tracing::info!(trace_id = %trace_id, status = status_code, elapsed = %elapsed, "<-- response");
    }
}

/// Request/response logging middleware.
///
/// Assigns every request a trace ID (available to handlers as an
/// `Extension<TraceId>`), logs one line on the way in and one on the way
/// out, and returns the ID in the `X-Trace-Id` header.
pub async fn request_logging(mut req: Request, next: Next) -> Response {
    let trace_id = generate_trace_id();
    req.extensions_mut().insert(TraceId(trace_id.clone()));

    // Swagger UI static assets
    if req.uri().path().starts_with("/docs") {
        return next.run(req).await;
    }

    let method = req.method().clone();
    let url = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    // Alert submissions carry raw event payloads; only a prefix is logged.
    let (req, req_body_snippet) = if matches!(method.as_str(), "POST" | "PUT" | "PATCH") {
        let (parts, body) = req.into_parts();
        let body_bytes = match axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    trace_id = %trace_id,
                    method = %method,
                    path = %url,
                    error = %e,
                    "Request body rejected"
                );
                let mut response = error_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &trace_id,
                    "payload_too_large",
                    "request body exceeds the 2 MiB limit",
                );
                attach_trace_id(&mut response, &trace_id);
                return response;
            }
        };
        let snippet = truncate_body(&body_bytes, MAX_BODY_LOG_CHARS);
        (Request::from_parts(parts, Body::from(body_bytes)), snippet)
    } else {
        (req, String::new())
    };

    tracing::info!(
        trace_id = %trace_id,
        method = %method,
        path = %url,
        body = %req_body_snippet,
        ua = %user_agent,
        "--> request"
    );

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = format_elapsed(start.elapsed().as_micros());

    let (parts, body) = response.into_parts();
    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let body_snippet = if is_json {
        truncate_body(&body_bytes, MAX_BODY_LOG_CHARS)
    } else {
        String::new()
    };

    log_response(&trace_id, parts.status, &elapsed, &body_snippet);

    let mut response = Response::from_parts(parts, Body::from(body_bytes));
    attach_trace_id(&mut response, &trace_id);
    response
}

fn attach_trace_id(response: &mut Response, trace_id: &str) {
    if let Ok(val) = HeaderValue::from_str(trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, val);
    }
}
