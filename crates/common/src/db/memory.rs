//! In-memory record store
//!
//! One lock guards all records, so every trait operation is atomic.

use super::{AccessRequestStore, InsertOutcome, ManuscriptStore, RecordStore, SettingsStore};
use crate::errors::{AppError, Result};
use crate::models::{AccessRequest, CounterKind, Manuscript, RequestStatus, StoredFile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Records {
    manuscripts: HashMap<Uuid, Manuscript>,
    requests: HashMap<Uuid, AccessRequest>,
    settings: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Arc<RwLock<Records>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn manuscript_not_found(id: Uuid) -> AppError {
    AppError::ManuscriptNotFound { id: id.to_string() }
}

#[async_trait]
impl ManuscriptStore for MemoryStore {
    async fn get_manuscript(&self, id: Uuid) -> Result<Option<Manuscript>> {
        Ok(self.records.read().await.manuscripts.get(&id).cloned())
    }

    async fn put_manuscript(&self, manuscript: &Manuscript) -> Result<()> {
        let mut records = self.records.write().await;
        let mut stored = manuscript.clone();

        // Files and counters of an existing record only change through
        // their own atomic operations
        if let Some(existing) = records.manuscripts.get(&manuscript.id) {
            stored.files = existing.files.clone();
            stored.counters = existing.counters;
            stored.created_at = existing.created_at;
        }

        records.manuscripts.insert(stored.id, stored);
        Ok(())
    }

    async fn append_file(&self, manuscript_id: Uuid, file: StoredFile) -> Result<usize> {
        let mut records = self.records.write().await;
        let manuscript = records
            .manuscripts
            .get_mut(&manuscript_id)
            .ok_or_else(|| manuscript_not_found(manuscript_id))?;

        manuscript.files.push(file);
        manuscript.updated_at = Utc::now();
        Ok(manuscript.files.len() - 1)
    }

    async fn remove_file_at(&self, manuscript_id: Uuid, slot: usize) -> Result<StoredFile> {
        let mut records = self.records.write().await;
        let manuscript = records
            .manuscripts
            .get_mut(&manuscript_id)
            .ok_or_else(|| manuscript_not_found(manuscript_id))?;

        if slot >= manuscript.files.len() {
            return Err(AppError::FileNotFound {
                manuscript_id: manuscript_id.to_string(),
                slot,
            });
        }
        manuscript.updated_at = Utc::now();
        Ok(manuscript.files.remove(slot))
    }

    async fn increment_counter(&self, manuscript_id: Uuid, kind: CounterKind) -> Result<()> {
        let mut records = self.records.write().await;
        let manuscript = records
            .manuscripts
            .get_mut(&manuscript_id)
            .ok_or_else(|| manuscript_not_found(manuscript_id))?;

        manuscript.counters.bump(kind);
        Ok(())
    }
}

#[async_trait]
impl AccessRequestStore for MemoryStore {
    async fn insert_access_request(
        &self,
        request: &AccessRequest,
        open_since: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let mut records = self.records.write().await;

        let existing = records.requests.values().find(|r| {
            r.requester_id == request.requester_id
                && r.manuscript_id == request.manuscript_id
                && r.status == RequestStatus::Pending
                && r.created_at >= open_since
        });
        if let Some(existing) = existing {
            return Ok(InsertOutcome::Duplicate {
                existing_id: existing.id,
            });
        }

        records.requests.insert(request.id, request.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>> {
        Ok(self.records.read().await.requests.get(&id).cloned())
    }

    async fn complete_review(&self, reviewed: &AccessRequest) -> Result<bool> {
        let mut records = self.records.write().await;
        match records.requests.get_mut(&reviewed.id) {
            Some(current) if current.status == RequestStatus::Pending => {
                *current = reviewed.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn approved_for(
        &self,
        requester_id: Uuid,
        manuscript_id: Uuid,
    ) -> Result<Vec<AccessRequest>> {
        Ok(self
            .records
            .read()
            .await
            .requests
            .values()
            .filter(|r| {
                r.requester_id == requester_id
                    && r.manuscript_id == manuscript_id
                    && r.status == RequestStatus::Approved
            })
            .cloned()
            .collect())
    }

    async fn list_pending(&self) -> Result<Vec<AccessRequest>> {
        let mut pending: Vec<_> = self
            .records
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.created_at);
        Ok(pending)
    }

    async fn list_by_requester(&self, requester_id: Uuid) -> Result<Vec<AccessRequest>> {
        let mut mine: Vec<_> = self
            .records
            .read()
            .await
            .requests
            .values()
            .filter(|r| r.requester_id == requester_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(mine)
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.records.read().await.settings.get(key).cloned())
    }

    async fn put_setting(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.records
            .write()
            .await
            .settings
            .insert(key.to_string(), value);
        Ok(())
    }
}

impl RecordStore for MemoryStore {}
