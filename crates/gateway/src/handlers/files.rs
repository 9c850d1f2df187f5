//! File handlers: upload, view, download, delete and orphan sweep

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{Authenticated, Caller};
use crate::AppState;
use scriptorium_common::{
    errors::Result,
    models::StoredFile,
};
use scriptorium_delivery::{DeliveryKind, IngestedFile, ServedFile, Upload};

pub const WATERMARK_ID_HEADER: &str = "x-watermark-id";
pub const CHECKSUM_HEADER: &str = "x-content-checksum";

#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// Original file name; the last path segment is kept
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct SweepResponse {
    pub removed: Vec<String>,
}

/// Upload a file; the body is the raw content
pub async fn upload_file(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(manuscript_id): Path<Uuid>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestedFile>)> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let upload = Upload::new(body, mime_type, params.name.unwrap_or_default());
    let ingested = state
        .pipeline
        .ingest_file(&principal, manuscript_id, upload)
        .await?;

    Ok((StatusCode::CREATED, Json(ingested)))
}

/// Serve a file inline; needs CONTENT
pub async fn view_file(
    State(state): State<AppState>,
    caller: Caller,
    Path((manuscript_id, slot)): Path<(Uuid, usize)>,
) -> Result<Response> {
    let served = state
        .pipeline
        .view_file(caller.principal(), manuscript_id, slot)
        .await?;
    Ok(file_response(served, DeliveryKind::View))
}

/// Serve a file as an attachment; needs DOWNLOAD
pub async fn download_file(
    State(state): State<AppState>,
    caller: Caller,
    Path((manuscript_id, slot)): Path<(Uuid, usize)>,
) -> Result<Response> {
    let served = state
        .pipeline
        .download_file(caller.principal(), manuscript_id, slot)
        .await?;
    Ok(file_response(served, DeliveryKind::Download))
}

/// Delete the file at a slot; later slots shift down
pub async fn delete_file(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path((manuscript_id, slot)): Path<(Uuid, usize)>,
) -> Result<Json<StoredFile>> {
    let removed = state
        .pipeline
        .delete_file(&principal, manuscript_id, slot)
        .await?;
    Ok(Json(removed))
}

/// Remove blobs no file record points to
pub async fn sweep_orphans(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(manuscript_id): Path<Uuid>,
) -> Result<Json<SweepResponse>> {
    let removed = state
        .pipeline
        .sweep_orphans(&principal, manuscript_id)
        .await?;
    Ok(Json(SweepResponse { removed }))
}

fn file_response(served: ServedFile, kind: DeliveryKind) -> Response {
    let disposition = match kind {
        DeliveryKind::View => "inline",
        DeliveryKind::Download => "attachment",
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&served.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(&format!(
        "{}; filename=\"{}\"",
        disposition,
        header_safe(&served.file_name)
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Ok(value) = HeaderValue::from_str(&served.checksum) {
        headers.insert(CHECKSUM_HEADER, value);
    }
    if let Some(value) = served
        .watermark_id
        .as_deref()
        .and_then(|id| HeaderValue::from_str(id).ok())
    {
        headers.insert(WATERMARK_ID_HEADER, value);
    }
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, no-store"));

    (headers, Body::from(served.bytes)).into_response()
}

/// File name reduced to characters that are safe inside a quoted header value
fn header_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
