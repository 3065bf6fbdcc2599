//! HTTP handlers for document operations.
//! Request parsing and response shaping only; every decision about the
//! object store and metadata lives in `DocumentService`.

use crate::{
    errors::AppError,
    models::document::{Document, Page},
    services::document_service::{DEFAULT_CONTENT_TYPE, DEFAULT_LIST_LIMIT, DEFAULT_PRESIGN_TTL},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::{io, time::Duration};
use uuid::Uuid;

/// Multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Query params accepted by `GET /documents`.
///
/// Kept as strings so malformed numbers get our own error codes.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    /// Link lifetime in seconds.
    pub ttl: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// `POST /documents`: multipart upload, field `file`.
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field
            .content_type()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();

        let doc = state
            .documents
            .upload(Some(body), &filename, &content_type, None)
            .await?;
        return Ok((StatusCode::CREATED, Json(doc)));
    }

    Err(AppError::bad_request("FILE_REQUIRED", "file is required"))
}

/// `GET /documents?limit=&offset=`
pub async fn list_documents(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Page<Document>>, AppError> {
    let limit = parse_int(q.limit.as_deref(), DEFAULT_LIST_LIMIT)
        .ok_or_else(|| AppError::bad_request("INVALID_LIMIT", "invalid limit"))?;
    let offset = parse_int(q.offset.as_deref(), 0)
        .ok_or_else(|| AppError::bad_request("INVALID_OFFSET", "invalid offset"))?;

    Ok(Json(state.documents.list(limit, offset).await?))
}

/// `GET /documents/{id}`
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let id = parse_id(&id)?;
    Ok(Json(state.documents.get(&id).await?))
}

/// `DELETE /documents/{id}`
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    state.documents.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /documents/{id}/content`: stream the payload back.
pub async fn download_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_id(&id)?;
    let (doc, body) = state.documents.open(&id).await?;

    let mut response = Response::new(Body::from_stream(body));
    set_document_headers(response.headers_mut(), &doc);
    Ok(response)
}

/// `GET /documents/{id}/url?ttl=`: time-limited download link.
pub async fn presign_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<PresignQuery>,
) -> Result<Json<PresignResponse>, AppError> {
    let id = parse_id(&id)?;
    let ttl = match q.ttl.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| AppError::bad_request("INVALID_TTL", "invalid ttl"))?,
        None => DEFAULT_PRESIGN_TTL,
    };

    let link = state.documents.presign(&id, ttl).await?;
    Ok(Json(PresignResponse {
        url: link.url,
        expires_at: link.expires_at,
    }))
}

/// Accept any UUID spelling and normalize to the stored hyphenated form.
fn parse_id(raw: &str) -> Result<String, AppError> {
    Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| AppError::bad_request("INVALID_ID", "invalid id format"))
}

/// Absent or empty means `default`; anything else must be an integer.
fn parse_int(raw: Option<&str>, default: i64) -> Option<i64> {
    match raw.map(str::trim) {
        None | Some("") => Some(default),
        Some(value) => value.parse().ok(),
    }
}

fn invalid_multipart(err: MultipartError) -> AppError {
    AppError::new(err.status(), "INVALID_MULTIPART", err.body_text())
}

fn set_document_headers(headers: &mut HeaderMap, doc: &Document) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&doc.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(doc.size.max(0)));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", doc.filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&doc.created_at.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_normalized_or_rejected() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id.to_string());
        assert_eq!(
            parse_id(&id.simple().to_string().to_uppercase()).unwrap(),
            id.to_string()
        );
        assert_eq!(parse_id("not-a-uuid").unwrap_err().code, "INVALID_ID");
    }

    #[test]
    fn query_integers_default_when_blank() {
        assert_eq!(parse_int(None, 10), Some(10));
        assert_eq!(parse_int(Some(""), 10), Some(10));
        assert_eq!(parse_int(Some("-5"), 10), Some(-5));
        assert_eq!(parse_int(Some("abc"), 10), None);
    }
}
