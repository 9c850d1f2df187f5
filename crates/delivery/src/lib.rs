//! Scriptorium delivery services
//!
//! The boundary operations of the manuscript core:
//! - [`DeliveryPipeline`]: ingest, view, download and delete files
//! - [`AccessRequestWorkflow`]: create and review access requests
//! - [`WatermarkSettingsService`]: read and administer watermark settings
//!
//! Every operation returns `scriptorium_common::Result`; callers match on
//! `AppError::kind()` for the failure taxonomy.

pub mod clock;
pub mod pipeline;
pub mod requests;
pub mod retry;
pub mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use pipeline::{DeliveryKind, DeliveryPipeline, IngestedFile, ServedFile, Upload};
pub use requests::{AccessRequestWorkflow, NewAccessRequest, ReviewInput};
pub use retry::RetryPolicy;
pub use settings::WatermarkSettingsService;
