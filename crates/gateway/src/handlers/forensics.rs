//! Forensic watermark extraction
//!
//! Recovering a watermark id from a leaked copy is not supported. The
//! endpoint exists so callers get an explicit 501 instead of a false
//! "no watermark found".

use axum::{
    extract::Query,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::auth::Authenticated;
use scriptorium_common::{errors::Result, models::FileType};
use scriptorium_watermark::{extract_watermark_id, DocumentFormat};

#[derive(Debug, Deserialize)]
pub struct ExtractParams {
    /// Declared content type of the suspect copy
    pub mime_type: String,
}

#[derive(Serialize)]
pub struct ExtractResponse {
    pub watermark_id: String,
}

pub async fn extract(
    Authenticated(principal): Authenticated,
    Query(params): Query<ExtractParams>,
    body: Bytes,
) -> Result<Json<ExtractResponse>> {
    principal.require_admin()?;

    let format = DocumentFormat::from(FileType::classify(&params.mime_type));
    let watermark_id = extract_watermark_id(&body, format)?;
    Ok(Json(ExtractResponse { watermark_id }))
}
