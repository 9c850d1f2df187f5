//! Scriptorium forensic watermarking
//!
//! Stamps every delivered copy with the identity of its viewer:
//! - PDF: diagonal mark, two corner id labels and a footer on every page
//! - Images: a rotated tiled pattern plus a corner id stamp
//! - Text: served unmarked, there is no marking rule for plain text
//!
//! Marking is pure CPU work. Callers run it off the async executor.

mod errors;
mod font;
mod pdf;
mod raster;
mod text;

pub use errors::WatermarkError;
pub use text::watermark_text;

use chrono::{DateTime, Utc};
use scriptorium_common::models::{FileType, WatermarkSettings};
use scriptorium_common::Principal;
use serde::Serialize;
use uuid::Uuid;

/// Format of a document handed to the watermarker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Image,
    Text,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image => "image",
            DocumentFormat::Text => "text",
        }
    }
}

impl From<FileType> for DocumentFormat {
    fn from(file_type: FileType) -> Self {
        match file_type {
            FileType::Pdf => DocumentFormat::Pdf,
            FileType::Image => DocumentFormat::Image,
            FileType::Text => DocumentFormat::Text,
        }
    }
}

/// Who a delivered copy belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribution {
    pub user_id: Uuid,
    pub user_email: String,
    pub user_name: String,
    /// Fresh for every delivery, never reused
    pub watermark_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
}

impl Attribution {
    /// Attribution for one delivery to `principal`, with a new watermark id
    pub fn for_principal(principal: &Principal, timestamp: DateTime<Utc>) -> Self {
        Self {
            user_id: principal.id,
            user_email: principal.email.clone(),
            user_name: principal.display_name.clone(),
            watermark_id: Uuid::new_v4().to_string(),
            timestamp,
            institution: principal.institution.clone(),
        }
    }
}

/// Applies the current watermark settings to documents
#[derive(Debug, Clone)]
pub struct Watermarker {
    settings: WatermarkSettings,
}

impl Watermarker {
    pub fn new(settings: WatermarkSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &WatermarkSettings {
        &self.settings
    }

    /// Whether `apply` has a marking rule for the format
    pub fn supports(format: DocumentFormat) -> bool {
        matches!(format, DocumentFormat::Pdf | DocumentFormat::Image)
    }

    /// Whether an upload of this format and declared type can be marked
    /// once stored. Images are limited to the raster types we decode.
    pub fn accepts_upload(format: DocumentFormat, mime_type: &str) -> bool {
        match format {
            DocumentFormat::Image => raster::accepts_mime(mime_type),
            DocumentFormat::Pdf | DocumentFormat::Text => true,
        }
    }

    /// Return a marked copy of `document`.
    ///
    /// Formats without a marking rule fail with `UnsupportedFormat`; callers
    /// that serve such files unmarked check [`supports`](Self::supports) first.
    pub fn apply(
        &self,
        document: &[u8],
        format: DocumentFormat,
        attribution: &Attribution,
    ) -> Result<Vec<u8>, WatermarkError> {
        let text = watermark_text(attribution, &self.settings);
        match format {
            DocumentFormat::Pdf => pdf::mark(document, &text, attribution, &self.settings),
            DocumentFormat::Image => raster::mark(document, &text, attribution, &self.settings),
            DocumentFormat::Text => Err(WatermarkError::UnsupportedFormat {
                format: format.as_str().to_string(),
            }),
        }
    }
}

/// Recover the watermark id from a leaked copy.
///
/// Not available: marks are visual only and no decoder exists. Always fails
/// with `ExtractionUnavailable` so a missing capability is never mistaken
/// for "no watermark found".
pub fn extract_watermark_id(
    _document: &[u8],
    _format: DocumentFormat,
) -> Result<String, WatermarkError> {
    Err(WatermarkError::ExtractionUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_common::Role;

    #[test]
    fn test_attribution_ids_are_fresh() {
        let principal = Principal::new(Uuid::new_v4(), Role::User, "jane@example.edu", "Jane Doe");
        let now = Utc::now();
        let a = Attribution::for_principal(&principal, now);
        let b = Attribution::for_principal(&principal, now);
        assert_ne!(a.watermark_id, b.watermark_id);
        assert_eq!(a.user_email, "jane@example.edu");
    }

    #[test]
    fn test_text_is_unsupported() {
        let principal = Principal::new(Uuid::new_v4(), Role::User, "jane@example.edu", "Jane Doe");
        let marker = Watermarker::new(WatermarkSettings::with_text("Inst"));
        let err = marker
            .apply(
                b"plain words",
                DocumentFormat::Text,
                &Attribution::for_principal(&principal, Utc::now()),
            )
            .unwrap_err();
        assert!(matches!(err, WatermarkError::UnsupportedFormat { .. }));
        assert!(!Watermarker::supports(DocumentFormat::Text));
    }

    #[test]
    fn test_uploads_limited_to_markable_images() {
        assert!(Watermarker::accepts_upload(DocumentFormat::Image, "image/png"));
        assert!(!Watermarker::accepts_upload(DocumentFormat::Image, "image/svg+xml"));
        assert!(Watermarker::accepts_upload(DocumentFormat::Pdf, "application/pdf"));
        assert!(Watermarker::accepts_upload(DocumentFormat::Text, "text/plain"));
    }

    #[test]
    fn test_extraction_is_explicitly_unavailable() {
        for format in [DocumentFormat::Pdf, DocumentFormat::Image, DocumentFormat::Text] {
            assert!(matches!(
                extract_watermark_id(b"anything", format),
                Err(WatermarkError::ExtractionUnavailable)
            ));
        }
    }
}
