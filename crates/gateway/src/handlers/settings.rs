//! Watermark settings handlers

use axum::{extract::State, Json};

use crate::auth::Authenticated;
use crate::AppState;
use scriptorium_common::{
    errors::Result,
    models::{WatermarkSettings, WatermarkSettingsUpdate},
};

pub async fn get_watermark_settings(
    State(state): State<AppState>,
) -> Result<Json<WatermarkSettings>> {
    Ok(Json(state.settings.current().await?))
}

/// Admin only; out-of-range values are clamped
pub async fn update_watermark_settings(
    State(state): State<AppState>,
    Authenticated(admin): Authenticated,
    Json(update): Json<WatermarkSettingsUpdate>,
) -> Result<Json<WatermarkSettings>> {
    Ok(Json(state.settings.update(&admin, update).await?))
}
