//! Request logging layer configuration

use axum::body::Body;
use http::{Request, Response, StatusCode};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{info_span, Span};

pub type RequestTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    fn(&Request<Body>) -> Span,
    fn(&Request<Body>, &Span),
    fn(&Response<Body>, Duration, &Span),
    DefaultOnBodyChunk,
    DefaultOnEos,
    fn(ServerErrorsFailureClass, Duration, &Span),
>;

fn make_span(request: &Request<Body>) -> Span {
    info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        query = ?request.uri().query(),
    )
}

fn on_request(request: &Request<Body>, _span: &Span) {
    tracing::debug!("started {} {}", request.method(), request.uri().path());
}

fn on_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    let status = response.status();
    let latency_ms = latency.as_millis();

    // 503 is how a failing check is reported, not a server fault.
    if status.is_success() || status == StatusCode::SERVICE_UNAVAILABLE {
        tracing::info!(status = status.as_u16(), latency_ms = latency_ms, "request completed");
    } else if status.is_client_error() {
        tracing::warn!(status = status.as_u16(), latency_ms = latency_ms, "client error response");
    } else {
        tracing::error!(status = status.as_u16(), latency_ms = latency_ms, "server error response");
    }
}

fn on_failure(error: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    tracing::debug!(
        latency_ms = latency.as_millis(),
        error = ?error,
        "request classified as failure"
    );
}

pub fn logging_layer() -> RequestTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(make_span as fn(&Request<Body>) -> Span)
        .on_request(on_request as fn(&Request<Body>, &Span))
        .on_response(on_response as fn(&Response<Body>, Duration, &Span))
        .on_failure(on_failure as fn(ServerErrorsFailureClass, Duration, &Span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_layer_passes_responses_through() {
        let app = Router::new()
            .route("/up", get(|| async { "ok" }))
            .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .layer(logging_layer());

        let request = Request::builder().uri("/up").body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = Request::builder().uri("/down").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
