//! Domain model
//!
//! Plain records shared by the decision engine, the workflow and the
//! delivery pipeline. Persistence mappings live in `db`.

mod access_request;
mod file;
mod manuscript;
mod settings;

pub use access_request::{AccessRequest, RequestStatus, RequestedLevel, ReviewDecision};
pub use file::{FileType, StoredFile};
pub use manuscript::{
    AccessLevelSettings, AccessTier, ContentThreshold, CounterKind, Counters, DownloadThreshold,
    Lifecycle, Manuscript, ManuscriptStatus, MetadataThreshold, Visibility,
};
pub use settings::{WatermarkPosition, WatermarkSettings, WatermarkSettingsUpdate};
