//! Watermark settings administration
//!
//! One active settings record, persisted under [`WATERMARK_SETTINGS_KEY`].
//! Until an admin saves one, deliveries use the defaults seeded with the
//! configured institution text.

use scriptorium_common::db::RecordStore;
use scriptorium_common::errors::Result;
use scriptorium_common::models::{WatermarkSettings, WatermarkSettingsUpdate};
use scriptorium_common::{Principal, WATERMARK_SETTINGS_KEY};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct WatermarkSettingsService {
    store: Arc<dyn RecordStore>,
    default_text: String,
}

impl WatermarkSettingsService {
    pub fn new(store: Arc<dyn RecordStore>, default_text: impl Into<String>) -> Self {
        Self {
            store,
            default_text: default_text.into(),
        }
    }

    pub fn defaults(&self) -> WatermarkSettings {
        WatermarkSettings::with_text(self.default_text.clone())
    }

    /// Settings every delivery reads
    pub async fn current(&self) -> Result<WatermarkSettings> {
        let Some(value) = self.store.get_setting(WATERMARK_SETTINGS_KEY).await? else {
            return Ok(self.defaults());
        };

        match serde_json::from_value::<WatermarkSettings>(value) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                // Defaults keep marking enabled
                warn!(error = %e, "Stored watermark settings unreadable, using defaults");
                Ok(self.defaults())
            }
        }
    }

    /// Merge `update` onto the current settings and persist. Admin only.
    #[instrument(skip(self, admin, update), fields(principal_id = %admin.id))]
    pub async fn update(
        &self,
        admin: &Principal,
        update: WatermarkSettingsUpdate,
    ) -> Result<WatermarkSettings> {
        admin.require_admin()?;

        let updated = update.apply(self.current().await?);
        self.store
            .put_setting(WATERMARK_SETTINGS_KEY, serde_json::to_value(&updated)?)
            .await?;

        info!(
            enabled = updated.enabled,
            opacity = updated.opacity(),
            position = ?updated.position,
            "Watermark settings updated"
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_common::db::{MemoryStore, SettingsStore};
    use scriptorium_common::models::WatermarkPosition;
    use scriptorium_common::{AppError, Role};
    use uuid::Uuid;

    fn service() -> (WatermarkSettingsService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            WatermarkSettingsService::new(store.clone(), "Scriptorium Manuscript Repository"),
            store,
        )
    }

    fn principal(role: Role) -> Principal {
        Principal::new(Uuid::new_v4(), role, "admin@example.edu", "Ada Admin")
    }

    #[tokio::test]
    async fn test_defaults_until_saved() {
        let (service, _) = service();
        let settings = service.current().await.unwrap();

        assert_eq!(settings.text, "Scriptorium Manuscript Repository");
        assert!(settings.enabled);
        assert_eq!(settings.font_size(), 14.0);
        assert_eq!(settings.opacity(), 0.15);
        assert_eq!(settings.position, WatermarkPosition::Diagonal);
        assert_eq!(settings.color(), "#808080");
        assert!(settings.include_user_id && settings.include_timestamp);
    }

    #[tokio::test]
    async fn test_admin_update_clamps_and_persists() {
        let (service, store) = service();
        let update = WatermarkSettingsUpdate {
            opacity: Some(0.9),
            position: Some(WatermarkPosition::Tiled),
            ..Default::default()
        };

        let saved = service.update(&principal(Role::Admin), update).await.unwrap();
        assert_eq!(saved.opacity(), 0.5);

        let persisted = store.get_setting(WATERMARK_SETTINGS_KEY).await.unwrap().unwrap();
        assert_eq!(persisted["opacity"], 0.5);
        assert_eq!(persisted["position"], "tiled");
        assert_eq!(service.current().await.unwrap(), saved);
    }

    #[test]
    fn test_non_admin_cannot_update() {
        let (service, _) = service();
        for role in [Role::User, Role::Owner, Role::Reviewer] {
            let err = tokio_test::block_on(
                service.update(&principal(role), WatermarkSettingsUpdate::default()),
            )
            .unwrap_err();
            assert!(matches!(err, AppError::Forbidden { .. }));
        }
    }

    #[tokio::test]
    async fn test_unreadable_record_falls_back_to_defaults() {
        let (service, store) = service();
        store
            .put_setting(WATERMARK_SETTINGS_KEY, serde_json::json!({ "text": 3 }))
            .await
            .unwrap();

        assert_eq!(service.current().await.unwrap(), service.defaults());
    }
}
