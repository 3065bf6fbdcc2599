//! Prometheus request metrics.
//!
//! Every request except the scrape endpoint itself bumps
//! `http_requests_total{method,path,status}` and records its latency in
//! `http_request_duration_seconds{method,route,status}`. Routes are labelled
//! by their matched pattern (`/documents/{id}`), so ids never become label
//! values.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::{sync::OnceLock, time::Instant};

pub const METRICS_PATH: &str = "/metrics";
pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUEST_DURATION: &str = "http_request_duration_seconds";

const UNMATCHED_ROUTE: &str = "UNMATCHED";

/// Prometheus client default buckets, in seconds.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static RECORDER: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the process-wide recorder on first call; later calls share it.
pub fn prometheus_handle() -> anyhow::Result<PrometheusHandle> {
    RECORDER
        .get_or_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Full(REQUEST_DURATION.to_string()),
                    DURATION_BUCKETS,
                )
                .and_then(PrometheusBuilder::install_recorder)
                .map_err(|err| err.to_string())
        })
        .clone()
        .map_err(anyhow::Error::msg)
}

pub async fn track_metrics(req: Request, next: Next) -> Response {
    if req.uri().path() == METRICS_PATH {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let matched = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned());
    let path = matched
        .clone()
        .unwrap_or_else(|| req.uri().path().to_owned());
    let route = matched.unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let start = Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    metrics::counter!(
        REQUESTS_TOTAL,
        "method" => method.clone(),
        "path" => path,
        "status" => status.clone()
    )
    .increment(1);
    metrics::histogram!(
        REQUEST_DURATION,
        "method" => method,
        "route" => route,
        "status" => status
    )
    .record(elapsed);

    response
}
