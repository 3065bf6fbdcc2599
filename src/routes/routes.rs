//! Defines routes for the document API.
//!
//! ## Structure
//! - **Document endpoints**
//!   - `POST   /documents`             : multipart upload (field `file`)
//!   - `GET    /documents`             : list (`?limit=&offset=`)
//!   - `GET    /documents/{id}`        : fetch metadata
//!   - `DELETE /documents/{id}`        : delete blob, then metadata
//!   - `GET    /documents/{id}/content`: stream the payload
//!   - `GET    /documents/{id}/url`    : presigned download link
//!
//! - **Presigned blobs**
//!   - `GET    /blobs/{*key}`          : serve a signed, unexpired link
//!
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Metrics**: `GET /metrics` (Prometheus text format)

use crate::{
    handlers::{
        blob_handlers::get_presigned_blob,
        document_handlers::{
            delete_document, download_document, get_document, list_documents, presign_document,
            upload_document,
        },
        health_handlers::{healthz, readyz},
        metrics_handlers::render_metrics,
    },
    middleware::http_metrics::{METRICS_PATH, track_metrics},
    state::AppState,
};
use axum::{
    Router,
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderName, Request},
    middleware,
    routing::get,
};
use opentelemetry::propagation::TextMapPropagator as _;
use opentelemetry_http::HeaderExtractor;
use std::time::Duration;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-router HTTP limits.
#[derive(Debug, Clone, Copy)]
pub struct HttpLimits {
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
}

/// Build the router for all document routes plus middleware.
///
/// Layers, outermost first: request id assignment, request tracing, request
/// id propagation to the response, request metrics, timeout, body limit.
pub fn routes(limits: HttpLimits) -> Router<AppState> {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(METRICS_PATH, get(render_metrics))
        .route("/documents", get(list_documents).post(upload_document))
        .route(
            "/documents/{id}",
            get(get_document).delete(delete_document),
        )
        .route("/documents/{id}/content", get(download_document))
        .route("/documents/{id}/url", get(presign_document))
        .route("/blobs/{*key}", get(get_presigned_blob))
        .layer(DefaultBodyLimit::max(limits.max_upload_bytes))
        .layer(TimeoutLayer::new(limits.request_timeout))
        .layer(middleware::from_fn(track_metrics))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    let request_id = req
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    let span = tracing::info_span!(
                        "request",
                        request_id = %request_id,
                        method = %req.method(),
                        path = %req.uri().path(),
                    );
                    // Continue a trace started upstream (W3C traceparent).
                    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
                        propagator.extract(&HeaderExtractor(req.headers()))
                    });
                    span.set_parent(parent);
                    span
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}
