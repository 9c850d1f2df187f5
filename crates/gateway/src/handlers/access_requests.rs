//! Access request handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::auth::{Authenticated, Caller};
use crate::AppState;
use scriptorium_common::{errors::Result, models::AccessRequest};
use scriptorium_delivery::{NewAccessRequest, ReviewInput};

/// File an access request for a manuscript
pub async fn create_request(
    State(state): State<AppState>,
    caller: Caller,
    Path(manuscript_id): Path<Uuid>,
    Json(input): Json<NewAccessRequest>,
) -> Result<(StatusCode, Json<AccessRequest>)> {
    let request = state
        .workflow
        .create(caller.principal(), manuscript_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// Approve or reject a pending request
pub async fn review_request(
    State(state): State<AppState>,
    Authenticated(reviewer): Authenticated,
    Path(request_id): Path<Uuid>,
    Json(input): Json<ReviewInput>,
) -> Result<Json<AccessRequest>> {
    let reviewed = state.workflow.review(&reviewer, request_id, input).await?;
    Ok(Json(reviewed))
}

/// Requests awaiting review
pub async fn list_pending(
    State(state): State<AppState>,
    Authenticated(reviewer): Authenticated,
) -> Result<Json<Vec<AccessRequest>>> {
    Ok(Json(state.workflow.list_pending(&reviewer).await?))
}

/// The caller's own requests
pub async fn list_mine(
    State(state): State<AppState>,
    Authenticated(requester): Authenticated,
) -> Result<Json<Vec<AccessRequest>>> {
    Ok(Json(state.workflow.list_mine(&requester).await?))
}
