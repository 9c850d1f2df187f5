//! PostgreSQL record store on SeaORM
//!
//! Concurrency rules:
//! - counters use `col = col + 1`
//! - slot changes hold the manuscript row lock for the whole transaction
//! - request creation holds a transaction-scoped advisory lock on the
//!   (requester, manuscript) pair
//! - reviews are a conditional update on `status = 'pending'`
//! - manuscripts, grants, requests and settings are read from the primary;
//!   only the review listings may lag on a replica

use super::models::*;
use super::{AccessRequestStore, InsertOutcome, ManuscriptStore, RecordStore, SettingsStore};
use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::models::{
    AccessLevelSettings, AccessRequest, CounterKind, Counters, FileType, Lifecycle, Manuscript,
    RequestStatus, RequestedLevel, StoredFile,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection,
    DbBackend, EntityTrait, NotSet, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    Statement, TransactionTrait,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");
        let primary = Self::connect(&config.url, config).await.map_err(|e| {
            AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            }
        })?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                let conn = Self::connect(read_url, config).await.map_err(|e| {
                    AppError::DatabaseConnection {
                        message: format!("Failed to connect to replica: {}", e),
                    }
                })?;
                Some(conn)
            }
            None => None,
        };

        info!("Database connections established");
        Ok(Self { primary, replica })
    }

    async fn connect(
        url: &str,
        config: &DatabaseConfig,
    ) -> std::result::Result<DatabaseConnection, sea_orm::DbErr> {
        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);
        Database::connect(opts).await
    }

    /// Apply the bundled schema migrations on the primary
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(self.primary.get_postgres_connection_pool())
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Migration failed: {}", e),
            })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Connection for reads that must observe the latest writes (always primary)
    pub fn consistent(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }

        Ok(())
    }
}

/// Record store backed by PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row conversions
// ============================================================================

/// Serde string form of a unit enum, e.g. `Visibility::Public` -> "public"
fn enum_text<T: Serialize>(value: &T) -> Result<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(text) => Ok(text),
        other => Err(AppError::Internal {
            message: format!("expected a string encoding, got {}", other),
        }),
    }
}

fn parse_enum<T: DeserializeOwned>(column: &str, text: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(text.to_string())).map_err(|e| {
        AppError::CorruptData {
            resource: format!("column {}", column),
            message: e.to_string(),
        }
    })
}

fn parse_with<T>(column: &str, parsed: std::result::Result<T, String>) -> Result<T> {
    parsed.map_err(|message| AppError::CorruptData {
        resource: format!("column {}", column),
        message,
    })
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

fn days_to_db(days: Option<u32>) -> Option<i32> {
    days.map(|d| i32::try_from(d).unwrap_or(i32::MAX))
}

fn days_from_db(days: Option<i32>) -> Option<u32> {
    days.and_then(|d| u32::try_from(d).ok())
}

fn file_from_row(row: ManuscriptFileRow) -> Result<StoredFile> {
    Ok(StoredFile {
        id: row.id,
        file_type: parse_with("file_type", row.file_type.parse::<FileType>())?,
        storage_key: row.storage_key,
        checksum: row.checksum,
        size: count(row.size),
        mime_type: row.mime_type,
        original_name: row.original_name,
        encryption_key_id: row.encryption_key_id,
        uploaded_by: row.uploaded_by,
        uploaded_at: row.uploaded_at.with_timezone(&Utc),
    })
}

fn manuscript_from_row(row: ManuscriptRow, files: Vec<StoredFile>) -> Result<Manuscript> {
    let access_level: AccessLevelSettings =
        serde_json::from_value(row.access_level).map_err(|e| AppError::CorruptData {
            resource: format!("manuscript {}", row.id),
            message: e.to_string(),
        })?;

    let lifecycle = match (row.deleted_at, row.deleted_by) {
        (Some(at), Some(by)) => Lifecycle::Deleted {
            at: at.with_timezone(&Utc),
            by,
        },
        _ => Lifecycle::Active,
    };

    Ok(Manuscript {
        id: row.id,
        owner_id: row.owner_id,
        title: row.title,
        visibility: parse_enum("visibility", &row.visibility)?,
        access_level,
        status: parse_enum("status", &row.status)?,
        files,
        counters: Counters {
            view_count: count(row.view_count),
            download_count: count(row.download_count),
            access_request_count: count(row.access_request_count),
        },
        lifecycle,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    })
}

fn request_from_row(row: AccessRequestRow) -> Result<AccessRequest> {
    let approved_level = match row.approved_level {
        Some(level) => Some(parse_with("approved_level", level.parse::<RequestedLevel>())?),
        None => None,
    };

    Ok(AccessRequest {
        id: row.id,
        manuscript_id: row.manuscript_id,
        requester_id: row.requester_id,
        requested_level: parse_with("requested_level", row.requested_level.parse())?,
        justification: row.justification,
        purpose: row.purpose,
        institution: row.institution,
        requested_duration_days: days_from_db(row.requested_duration_days),
        status: parse_with("status", row.status.parse::<RequestStatus>())?,
        approved_level,
        approved_duration_days: days_from_db(row.approved_duration_days),
        reviewed_by: row.reviewed_by,
        reviewed_at: row.reviewed_at.map(|at| at.with_timezone(&Utc)),
        review_notes: row.review_notes,
        created_at: row.created_at.with_timezone(&Utc),
    })
}

fn manuscript_not_found(id: Uuid) -> AppError {
    AppError::ManuscriptNotFound { id: id.to_string() }
}

fn counter_column(kind: CounterKind) -> ManuscriptColumn {
    match kind {
        CounterKind::View => ManuscriptColumn::ViewCount,
        CounterKind::Download => ManuscriptColumn::DownloadCount,
        CounterKind::AccessRequest => ManuscriptColumn::AccessRequestCount,
    }
}

// ============================================================================
// Store implementations
// ============================================================================

#[async_trait]
impl ManuscriptStore for PgStore {
    async fn get_manuscript(&self, id: Uuid) -> Result<Option<Manuscript>> {
        let conn = self.pool.consistent();
        let Some(row) = ManuscriptEntity::find_by_id(id).one(conn).await? else {
            return Ok(None);
        };

        let files = ManuscriptFileEntity::find()
            .filter(ManuscriptFileColumn::ManuscriptId.eq(id))
            .order_by_asc(ManuscriptFileColumn::Seq)
            .all(conn)
            .await?
            .into_iter()
            .map(file_from_row)
            .collect::<Result<Vec<_>>>()?;

        manuscript_from_row(row, files).map(Some)
    }

    async fn put_manuscript(&self, manuscript: &Manuscript) -> Result<()> {
        let (deleted_at, deleted_by) = match manuscript.lifecycle {
            Lifecycle::Active => (None, None),
            Lifecycle::Deleted { at, by } => (Some(at.into()), Some(by)),
        };

        let row = ManuscriptActiveModel {
            id: Set(manuscript.id),
            owner_id: Set(manuscript.owner_id),
            title: Set(manuscript.title.clone()),
            visibility: Set(enum_text(&manuscript.visibility)?),
            access_level: Set(serde_json::to_value(manuscript.access_level)?),
            status: Set(enum_text(&manuscript.status)?),
            view_count: Set(i64::try_from(manuscript.counters.view_count).unwrap_or(i64::MAX)),
            download_count: Set(
                i64::try_from(manuscript.counters.download_count).unwrap_or(i64::MAX),
            ),
            access_request_count: Set(
                i64::try_from(manuscript.counters.access_request_count).unwrap_or(i64::MAX),
            ),
            deleted_at: Set(deleted_at),
            deleted_by: Set(deleted_by),
            created_at: Set(manuscript.created_at.into()),
            updated_at: Set(manuscript.updated_at.into()),
        };

        // Counters are only ever touched by increments
        ManuscriptEntity::insert(row)
            .on_conflict(
                OnConflict::column(ManuscriptColumn::Id)
                    .update_columns([
                        ManuscriptColumn::OwnerId,
                        ManuscriptColumn::Title,
                        ManuscriptColumn::Visibility,
                        ManuscriptColumn::AccessLevel,
                        ManuscriptColumn::Status,
                        ManuscriptColumn::DeletedAt,
                        ManuscriptColumn::DeletedBy,
                        ManuscriptColumn::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.pool.write())
            .await?;
        Ok(())
    }

    async fn append_file(&self, manuscript_id: Uuid, file: StoredFile) -> Result<usize> {
        let txn = self.pool.write().begin().await?;

        ManuscriptEntity::find_by_id(manuscript_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| manuscript_not_found(manuscript_id))?;

        ManuscriptFileActiveModel {
            id: Set(file.id),
            manuscript_id: Set(manuscript_id),
            seq: NotSet,
            file_type: Set(file.file_type.as_str().to_string()),
            storage_key: Set(file.storage_key),
            checksum: Set(file.checksum),
            size: Set(i64::try_from(file.size).unwrap_or(i64::MAX)),
            mime_type: Set(file.mime_type),
            original_name: Set(file.original_name),
            encryption_key_id: Set(file.encryption_key_id),
            uploaded_by: Set(file.uploaded_by),
            uploaded_at: Set(file.uploaded_at.into()),
        }
        .insert(&txn)
        .await?;

        let total = ManuscriptFileEntity::find()
            .filter(ManuscriptFileColumn::ManuscriptId.eq(manuscript_id))
            .count(&txn)
            .await?;

        ManuscriptEntity::update_many()
            .col_expr(ManuscriptColumn::UpdatedAt, Expr::current_timestamp().into())
            .filter(ManuscriptColumn::Id.eq(manuscript_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(usize::try_from(total).unwrap_or(usize::MAX).saturating_sub(1))
    }

    async fn remove_file_at(&self, manuscript_id: Uuid, slot: usize) -> Result<StoredFile> {
        let txn = self.pool.write().begin().await?;

        ManuscriptEntity::find_by_id(manuscript_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| manuscript_not_found(manuscript_id))?;

        let row = ManuscriptFileEntity::find()
            .filter(ManuscriptFileColumn::ManuscriptId.eq(manuscript_id))
            .order_by_asc(ManuscriptFileColumn::Seq)
            .offset(slot as u64)
            .limit(1)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::FileNotFound {
                manuscript_id: manuscript_id.to_string(),
                slot,
            })?;

        ManuscriptFileEntity::delete_by_id(row.id).exec(&txn).await?;

        ManuscriptEntity::update_many()
            .col_expr(ManuscriptColumn::UpdatedAt, Expr::current_timestamp().into())
            .filter(ManuscriptColumn::Id.eq(manuscript_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        file_from_row(row)
    }

    async fn increment_counter(&self, manuscript_id: Uuid, kind: CounterKind) -> Result<()> {
        let column = counter_column(kind);
        let result = ManuscriptEntity::update_many()
            .col_expr(column, Expr::col(column).add(1))
            .filter(ManuscriptColumn::Id.eq(manuscript_id))
            .exec(self.pool.write())
            .await?;

        if result.rows_affected == 0 {
            return Err(manuscript_not_found(manuscript_id));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessRequestStore for PgStore {
    async fn insert_access_request(
        &self,
        request: &AccessRequest,
        open_since: DateTime<Utc>,
    ) -> Result<InsertOutcome> {
        let txn = self.pool.write().begin().await?;

        // Serialises creators of the same pair until commit
        let lock_key = format!("access_request:{}:{}", request.requester_id, request.manuscript_id);
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtextextended($1, 0))",
            [lock_key.into()],
        ))
        .await?;

        let open_since: sea_orm::prelude::DateTimeWithTimeZone = open_since.into();
        let existing = AccessRequestEntity::find()
            .filter(AccessRequestColumn::RequesterId.eq(request.requester_id))
            .filter(AccessRequestColumn::ManuscriptId.eq(request.manuscript_id))
            .filter(AccessRequestColumn::Status.eq(RequestStatus::Pending.as_str()))
            .filter(AccessRequestColumn::CreatedAt.gte(open_since))
            .one(&txn)
            .await?;

        if let Some(existing) = existing {
            txn.rollback().await?;
            return Ok(InsertOutcome::Duplicate {
                existing_id: existing.id,
            });
        }

        AccessRequestActiveModel {
            id: Set(request.id),
            manuscript_id: Set(request.manuscript_id),
            requester_id: Set(request.requester_id),
            requested_level: Set(request.requested_level.as_str().to_string()),
            justification: Set(request.justification.clone()),
            purpose: Set(request.purpose.clone()),
            institution: Set(request.institution.clone()),
            requested_duration_days: Set(days_to_db(request.requested_duration_days)),
            status: Set(request.status.as_str().to_string()),
            approved_level: Set(request.approved_level.map(|l| l.as_str().to_string())),
            approved_duration_days: Set(days_to_db(request.approved_duration_days)),
            reviewed_by: Set(request.reviewed_by),
            reviewed_at: Set(request.reviewed_at.map(Into::into)),
            review_notes: Set(request.review_notes.clone()),
            created_at: Set(request.created_at.into()),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;
        Ok(InsertOutcome::Inserted)
    }

    async fn get_access_request(&self, id: Uuid) -> Result<Option<AccessRequest>> {
        AccessRequestEntity::find_by_id(id)
            .one(self.pool.consistent())
            .await?
            .map(request_from_row)
            .transpose()
    }

    async fn complete_review(&self, reviewed: &AccessRequest) -> Result<bool> {
        let reviewed_at: Option<sea_orm::prelude::DateTimeWithTimeZone> =
            reviewed.reviewed_at.map(Into::into);

        let result = AccessRequestEntity::update_many()
            .col_expr(
                AccessRequestColumn::Status,
                Expr::value(reviewed.status.as_str().to_string()),
            )
            .col_expr(
                AccessRequestColumn::ApprovedLevel,
                Expr::value(reviewed.approved_level.map(|l| l.as_str().to_string())),
            )
            .col_expr(
                AccessRequestColumn::ApprovedDurationDays,
                Expr::value(days_to_db(reviewed.approved_duration_days)),
            )
            .col_expr(AccessRequestColumn::ReviewedBy, Expr::value(reviewed.reviewed_by))
            .col_expr(AccessRequestColumn::ReviewedAt, Expr::value(reviewed_at))
            .col_expr(
                AccessRequestColumn::ReviewNotes,
                Expr::value(reviewed.review_notes.clone()),
            )
            .filter(AccessRequestColumn::Id.eq(reviewed.id))
            .filter(AccessRequestColumn::Status.eq(RequestStatus::Pending.as_str()))
            .exec(self.pool.write())
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn approved_for(
        &self,
        requester_id: Uuid,
        manuscript_id: Uuid,
    ) -> Result<Vec<AccessRequest>> {
        AccessRequestEntity::find()
            .filter(AccessRequestColumn::RequesterId.eq(requester_id))
            .filter(AccessRequestColumn::ManuscriptId.eq(manuscript_id))
            .filter(AccessRequestColumn::Status.eq(RequestStatus::Approved.as_str()))
            .all(self.pool.consistent())
            .await?
            .into_iter()
            .map(request_from_row)
            .collect()
    }

    async fn list_pending(&self) -> Result<Vec<AccessRequest>> {
        AccessRequestEntity::find()
            .filter(AccessRequestColumn::Status.eq(RequestStatus::Pending.as_str()))
            .order_by_asc(AccessRequestColumn::CreatedAt)
            .all(self.pool.read())
            .await?
            .into_iter()
            .map(request_from_row)
            .collect()
    }

    async fn list_by_requester(&self, requester_id: Uuid) -> Result<Vec<AccessRequest>> {
        AccessRequestEntity::find()
            .filter(AccessRequestColumn::RequesterId.eq(requester_id))
            .order_by_desc(AccessRequestColumn::CreatedAt)
            .all(self.pool.read())
            .await?
            .into_iter()
            .map(request_from_row)
            .collect()
    }
}

#[async_trait]
impl SettingsStore for PgStore {
    async fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(SettingEntity::find_by_id(key.to_string())
            .one(self.pool.consistent())
            .await?
            .map(|row| row.value))
    }

    async fn put_setting(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let row = SettingActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            updated_at: Set(Utc::now().into()),
        };

        SettingEntity::insert(row)
            .on_conflict(
                OnConflict::column(SettingColumn::Key)
                    .update_columns([SettingColumn::Value, SettingColumn::UpdatedAt])
                    .to_owned(),
            )
            .exec(self.pool.write())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}
