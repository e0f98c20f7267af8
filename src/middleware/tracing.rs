//! Request logging middleware
//!
//! One log line per completed request, leveled by response class. The
//! caller address comes from proxy headers since the service sits behind a
//! load balancer in every deployed environment.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};

/// Log method, path, caller, status, and latency for every request
pub async fn request_tracing(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let caller = forwarded_client(&request).unwrap_or_else(|| "-".to_string());

    let started = Instant::now();
    let response = next.run(request).await;

    let status = response.status();
    let latency_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        tracing::error!(
            method = %method,
            path = %path,
            caller = %caller,
            status = status.as_u16(),
            latency_ms,
            "request failed"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            method = %method,
            path = %path,
            caller = %caller,
            status = status.as_u16(),
            latency_ms,
            "request rejected"
        );
    } else {
        tracing::info!(
            method = %method,
            path = %path,
            caller = %caller,
            status = status.as_u16(),
            latency_ms,
            "request served"
        );
    }

    response
}

/// First hop of x-forwarded-for, falling back to x-real-ip
fn forwarded_client(request: &Request) -> Option<String> {
    let headers = request.headers();

    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        return forwarded.split(',').next().map(|hop| hop.trim().to_string());
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
