//! Serves presigned blob links produced by `LocalObjectStore::presign`.

use crate::{errors::AppError, services::object_store::ObjectStore, state::AppState};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PresignedQuery {
    pub expires: Option<i64>,
    pub signature: Option<String>,
}

/// `GET /blobs/{*key}?expires=&signature=`
pub async fn get_presigned_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<PresignedQuery>,
) -> Result<Response, AppError> {
    let (Some(expires), Some(signature)) = (q.expires, q.signature) else {
        return Err(AppError::new(
            StatusCode::FORBIDDEN,
            "INVALID_SIGNATURE",
            "missing signature",
        ));
    };
    state.blobs.verify_presigned(&key, expires, &signature)?;

    let (body, info) = state.blobs.get(&key).await?;
    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&info.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.size.max(0)));
    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", info.etag)) {
        headers.insert(header::ETAG, value);
    }
    Ok(response)
}
