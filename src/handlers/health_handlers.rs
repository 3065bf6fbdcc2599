//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata DB and the object store

use crate::{services::object_store::ObjectStore, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Runs `SELECT 1` against the metadata pool.
/// 2. Round-trips a probe file through the object store.
///
/// HTTP 200 when both pass, 503 otherwise, with per-check detail.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };

    let storage = match state.blobs.health_check().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(e.to_string()),
    };

    let overall_ok = sqlite.ok && storage.ok;
    let checks = HashMap::from([("sqlite", sqlite), ("storage", storage)]);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
