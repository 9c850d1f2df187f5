//! Manuscript header handlers
//!
//! Manuscript metadata is owned by the catalogue service; this surface only
//! registers the header fields the access engine reads, so files can be
//! attached and served.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{Authenticated, Caller};
use crate::AppState;
use scriptorium_common::{
    errors::{AppError, Result},
    models::{
        AccessLevelSettings, Counters, FileType, Lifecycle, Manuscript, ManuscriptStatus,
        Visibility,
    },
    EffectiveLevel, Role,
};

/// Header fields accepted on registration
#[derive(Debug, Deserialize, Validate)]
pub struct ManuscriptInput {
    #[validate(length(min = 1, max = 1000))]
    pub title: String,

    pub visibility: Visibility,

    #[serde(default)]
    pub access_level: AccessLevelSettings,

    pub status: ManuscriptStatus,

    /// Admins may register on behalf of another owner
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct FileSummary {
    pub slot: usize,
    pub id: Uuid,
    pub file_type: FileType,
    pub mime_type: String,
    pub original_name: String,
    pub size: u64,
}

#[derive(Serialize)]
pub struct ManuscriptResponse {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub visibility: Visibility,
    pub access_level: AccessLevelSettings,
    pub status: ManuscriptStatus,
    pub files: Vec<FileSummary>,
    pub counters: Counters,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Manuscript> for ManuscriptResponse {
    fn from(m: Manuscript) -> Self {
        Self {
            id: m.id,
            owner_id: m.owner_id,
            title: m.title,
            visibility: m.visibility,
            access_level: m.access_level,
            status: m.status,
            files: m
                .files
                .into_iter()
                .enumerate()
                .map(|(slot, f)| FileSummary {
                    slot,
                    id: f.id,
                    file_type: f.file_type,
                    mime_type: f.mime_type,
                    original_name: f.original_name,
                    size: f.size,
                })
                .collect(),
            counters: m.counters,
            created_at: m.created_at.to_rfc3339(),
            updated_at: m.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AccessLevelResponse {
    pub manuscript_id: Uuid,
    pub level: EffectiveLevel,
}

/// Register or update a manuscript header
pub async fn put_manuscript(
    State(state): State<AppState>,
    Authenticated(principal): Authenticated,
    Path(id): Path<Uuid>,
    Json(input): Json<ManuscriptInput>,
) -> Result<(StatusCode, Json<ManuscriptResponse>)> {
    input.validate()?;

    if input.owner_id.is_some_and(|owner| owner != principal.id) && !principal.is_admin() {
        return Err(AppError::forbidden("only admins may register for another owner"));
    }

    let now = Utc::now();
    let (manuscript, status) = match state.store.get_manuscript(id).await? {
        Some(existing) => {
            if existing.is_deleted() {
                return Err(AppError::ManuscriptNotFound { id: id.to_string() });
            }
            if !existing.is_owned_by(principal.id) && !principal.is_admin() {
                return Err(AppError::forbidden("only the owner or an admin may edit a manuscript"));
            }
            let updated = Manuscript {
                owner_id: input.owner_id.unwrap_or(existing.owner_id),
                title: input.title,
                visibility: input.visibility,
                access_level: input.access_level,
                status: input.status,
                updated_at: now,
                ..existing
            };
            (updated, StatusCode::OK)
        }
        None => {
            if !matches!(principal.role, Role::Owner | Role::Admin) {
                return Err(AppError::forbidden("registering manuscripts needs the owner role"));
            }
            let created = Manuscript {
                id,
                owner_id: input.owner_id.unwrap_or(principal.id),
                title: input.title,
                visibility: input.visibility,
                access_level: input.access_level,
                status: input.status,
                files: Vec::new(),
                counters: Counters::default(),
                lifecycle: Lifecycle::Active,
                created_at: now,
                updated_at: now,
            };
            (created, StatusCode::CREATED)
        }
    };

    state.store.put_manuscript(&manuscript).await?;

    tracing::info!(
        manuscript_id = %id,
        principal_id = %principal.id,
        status = status.as_u16(),
        "Manuscript header saved"
    );

    // Re-read so the response carries the stored files and counters
    let stored = state
        .store
        .get_manuscript(id)
        .await?
        .ok_or_else(|| AppError::ManuscriptNotFound { id: id.to_string() })?;
    Ok((status, Json(stored.into())))
}

/// Get a manuscript header; needs METADATA
pub async fn get_manuscript(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ManuscriptResponse>> {
    let level = state
        .pipeline
        .effective_access_level(caller.principal(), id)
        .await?;
    if !level.permits(EffectiveLevel::Metadata) {
        // Hidden manuscripts look absent
        return Err(AppError::ManuscriptNotFound { id: id.to_string() });
    }

    let manuscript = state
        .store
        .get_manuscript(id)
        .await?
        .ok_or_else(|| AppError::ManuscriptNotFound { id: id.to_string() })?;
    Ok(Json(manuscript.into()))
}

/// Effective access level of the caller
pub async fn get_access_level(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<AccessLevelResponse>> {
    let level = state
        .pipeline
        .effective_access_level(caller.principal(), id)
        .await?;
    Ok(Json(AccessLevelResponse {
        manuscript_id: id,
        level,
    }))
}
