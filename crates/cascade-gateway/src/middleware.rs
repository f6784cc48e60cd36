use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request tracing middleware.
///
/// Runs the request inside an `http` span tagged with a fresh request id,
/// logs method, path, status and latency once the response is ready, and
/// echoes the id back in [`REQUEST_ID_HEADER`].
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let span = info_span!("http", request_id = %request_id, method = %method, path = %path);

    let started = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;

    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            latency_ms = started.elapsed().as_millis() as u64,
            "Request handled"
        );
    });

    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
