//! Manuscript record and its access settings

use super::file::StoredFile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who may discover the manuscript at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
    Restricted,
}

/// Standing of a requester relative to a manuscript, low to high
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    Public,
    Registered,
    Approved,
    Owner,
}

/// Minimum tier needed to read a manuscript's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataThreshold {
    Public,
    Registered,
    Approved,
}

/// Minimum tier needed to view a manuscript's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentThreshold {
    Registered,
    Approved,
    Owner,
}

/// Minimum tier needed to download a manuscript's files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadThreshold {
    Approved,
    Owner,
}

impl MetadataThreshold {
    pub fn tier(self) -> AccessTier {
        match self {
            MetadataThreshold::Public => AccessTier::Public,
            MetadataThreshold::Registered => AccessTier::Registered,
            MetadataThreshold::Approved => AccessTier::Approved,
        }
    }
}

impl ContentThreshold {
    pub fn tier(self) -> AccessTier {
        match self {
            ContentThreshold::Registered => AccessTier::Registered,
            ContentThreshold::Approved => AccessTier::Approved,
            ContentThreshold::Owner => AccessTier::Owner,
        }
    }
}

impl DownloadThreshold {
    pub fn tier(self) -> AccessTier {
        match self {
            DownloadThreshold::Approved => AccessTier::Approved,
            DownloadThreshold::Owner => AccessTier::Owner,
        }
    }
}

/// The three independent access thresholds of a manuscript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLevelSettings {
    pub metadata: MetadataThreshold,
    pub content: ContentThreshold,
    pub download: DownloadThreshold,
}

impl Default for AccessLevelSettings {
    fn default() -> Self {
        Self {
            metadata: MetadataThreshold::Public,
            content: ContentThreshold::Registered,
            download: DownloadThreshold::Approved,
        }
    }
}

/// Editorial status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManuscriptStatus {
    Draft,
    Review,
    Published,
    Archived,
}

impl ManuscriptStatus {
    pub fn is_published(self) -> bool {
        self == ManuscriptStatus::Published
    }
}

/// Soft-delete state. A deleted record keeps its tombstone for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Deleted { at: DateTime<Utc>, by: Uuid },
}

impl Lifecycle {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Lifecycle::Deleted { .. })
    }
}

/// Monotonic usage counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub view_count: u64,
    pub download_count: u64,
    pub access_request_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    View,
    Download,
    AccessRequest,
}

impl Counters {
    pub fn bump(&mut self, kind: CounterKind) {
        match kind {
            CounterKind::View => self.view_count += 1,
            CounterKind::Download => self.download_count += 1,
            CounterKind::AccessRequest => self.access_request_count += 1,
        }
    }
}

/// Manuscript record as supplied by the metadata collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manuscript {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub visibility: Visibility,
    pub access_level: AccessLevelSettings,
    pub status: ManuscriptStatus,
    /// Ordered file slots; a slot is addressed by position
    pub files: Vec<StoredFile>,
    pub counters: Counters,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Manuscript {
    /// A live, draft manuscript with default thresholds
    pub fn new(owner_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            title: title.into(),
            visibility: Visibility::Public,
            access_level: AccessLevelSettings::default(),
            status: ManuscriptStatus::Draft,
            files: Vec::new(),
            counters: Counters::default(),
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }

    pub fn is_owned_by(&self, principal_id: Uuid) -> bool {
        self.owner_id == principal_id
    }

    pub fn file_at(&self, slot: usize) -> Option<&StoredFile> {
        self.files.get(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_ordering() {
        assert!(AccessTier::Public < AccessTier::Registered);
        assert!(AccessTier::Registered < AccessTier::Approved);
        assert!(AccessTier::Approved < AccessTier::Owner);
    }

    #[test]
    fn test_lifecycle_serializes_explicit_state() {
        let active = serde_json::to_value(Lifecycle::Active).unwrap();
        assert_eq!(active, serde_json::json!({ "state": "active" }));

        let deleted = Lifecycle::Deleted {
            at: Utc::now(),
            by: Uuid::new_v4(),
        };
        assert!(deleted.is_deleted());
    }

    #[test]
    fn test_counter_bump() {
        let mut counters = Counters::default();
        counters.bump(CounterKind::View);
        counters.bump(CounterKind::View);
        counters.bump(CounterKind::Download);
        assert_eq!(counters.view_count, 2);
        assert_eq!(counters.download_count, 1);
        assert_eq!(counters.access_request_count, 0);
    }
}
