//! Record persistence for Scriptorium
//!
//! Provides:
//! - Store traits with the atomicity each operation needs
//! - An in-memory store for tests and development
//! - A PostgreSQL store on SeaORM
//! - Connection pool management

mod memory;
pub mod models;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{DbPool, PgStore};

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::errors::Result;
use crate::models::{AccessRequest, CounterKind, Manuscript, StoredFile};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Manuscript records and their file slots
#[async_trait]
pub trait ManuscriptStore: Send + Sync {
    async fn get_manuscript(&self, id: Uuid) -> Result<Option<Manuscript>>;

    /// Insert or replace the manuscript header. Files are left untouched.
    async fn put_manuscript(&self, manuscript: &Manuscript) -> Result<()>;

    /// Add a file at the end of the slot sequence and return its slot.
    ///
    /// Concurrent appends to one manuscript never lose a file.
    async fn append_file(&self, manuscript_id: Uuid, file: StoredFile) -> Result<usize>;

    /// Remove the file currently at `slot`; later slots shift down by one.
    async fn remove_file_at(&self, manuscript_id: Uuid, slot: usize) -> Result<StoredFile>;

    /// Single atomic increment
    async fn increment_counter(&self, manuscript_id: Uuid, kind: CounterKind) -> Result<()>;
}

/// Result of inserting an access request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// An open request already exists for the same requester and manuscript
    Duplicate { existing_id: Uuid },
}

#[async_trait]
pub trait AccessRequestStore: Send + Sync {
    /// Insert unless the requester already has an open request on the manuscript.
    ///
    /// A request is open when it is PENDING and was created at or after
    /// `open_since`. The check and the insert are one atomic step.
    async fn insert_access_request(
        &self,
        request: &AccessRequest,
        open_since: DateTime<Utc>,
    ) -> Result<InsertOutcome>;

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>>;

    /// Store a review outcome if the request is still PENDING.
    ///
    /// Returns `false` when someone else completed it first.
    async fn complete_review(&self, reviewed: &AccessRequest) -> Result<bool>;

    /// Approved requests of one requester on one manuscript
    async fn approved_for(&self, requester_id: Uuid, manuscript_id: Uuid)
        -> Result<Vec<AccessRequest>>;

    /// All PENDING requests, oldest first
    async fn list_pending(&self) -> Result<Vec<AccessRequest>>;

    /// A requester's own requests, newest first
    async fn list_by_requester(&self, requester_id: Uuid) -> Result<Vec<AccessRequest>>;
}

/// Keyed JSON settings
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put_setting(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Everything the services persist
#[async_trait]
pub trait RecordStore: ManuscriptStore + AccessRequestStore + SettingsStore + 'static {
    /// Readiness probe
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Open the configured record store, running migrations when asked
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn RecordStore>> {
    match config.backend {
        DatabaseBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        DatabaseBackend::Postgres => {
            let pool = DbPool::new(config).await?;
            if config.run_migrations {
                pool.migrate().await?;
            }
            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}
