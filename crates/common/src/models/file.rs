//! Stored file record embedded in a manuscript

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broad content class, decided once at upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Pdf,
    Image,
    Text,
}

impl FileType {
    /// Classify a declared content type.
    ///
    /// Exact `application/pdf` is a PDF, any `image/*` is an image,
    /// everything else falls back to text.
    pub fn classify(mime_type: &str) -> Self {
        let essence = mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if essence == "application/pdf" {
            FileType::Pdf
        } else if essence.starts_with("image/") {
            FileType::Image
        } else {
            FileType::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Image => "image",
            FileType::Text => "text",
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(FileType::Pdf),
            "image" => Ok(FileType::Image),
            "text" => Ok(FileType::Text),
            other => Err(format!("unknown file type '{}'", other)),
        }
    }
}

/// An encrypted file held in the content store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// Stable generated id, also the last segment of the storage key
    pub id: Uuid,
    pub file_type: FileType,
    /// Opaque content store key, never reused
    pub storage_key: String,
    /// Hex SHA-256 of the plaintext
    pub checksum: String,
    pub size: u64,
    pub mime_type: String,
    pub original_name: String,
    /// Key ring entry used for encryption; `None` for the legacy master key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key_id: Option<String>,
    pub uploaded_by: Uuid,
    pub uploaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_pdf_exact() {
        assert_eq!(FileType::classify("application/pdf"), FileType::Pdf);
        assert_eq!(FileType::classify("Application/PDF"), FileType::Pdf);
        assert_eq!(FileType::classify("application/pdf; charset=binary"), FileType::Pdf);
        assert_eq!(FileType::classify("application/x-pdf"), FileType::Text);
    }

    #[test]
    fn test_classify_images_and_fallback() {
        assert_eq!(FileType::classify("image/png"), FileType::Image);
        assert_eq!(FileType::classify("image/jpeg"), FileType::Image);
        assert_eq!(FileType::classify("text/plain"), FileType::Text);
        assert_eq!(FileType::classify(""), FileType::Text);
    }

    #[test]
    fn test_file_type_parse() {
        assert_eq!("image".parse::<FileType>().unwrap(), FileType::Image);
        assert!("video".parse::<FileType>().is_err());
    }
}
