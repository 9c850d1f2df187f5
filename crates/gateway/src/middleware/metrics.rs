//! Per-request metrics keyed on the matched route template

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use scriptorium_common::metrics::RequestMetrics;

/// Record count and latency for every request.
///
/// Uses the route template (`/manuscripts/{id}`) rather than the raw path
/// so ids never become label values.
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let tracker = RequestMetrics::start(request.method().as_str(), &endpoint);

    let response = next.run(request).await;
    tracker.finish(response.status().as_u16());
    response
}
