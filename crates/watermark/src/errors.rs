//! Watermarking error types

use scriptorium_common::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatermarkError {
    #[error("Unreadable PDF: {message}")]
    InvalidPdf { message: String },

    #[error("Unreadable image: {message}")]
    InvalidImage { message: String },

    #[error("No marking rule for format {format}")]
    UnsupportedFormat { format: String },

    #[error("Failed to encode marked document: {message}")]
    Encode { message: String },

    #[error("Forensic watermark extraction is unavailable")]
    ExtractionUnavailable,
}

impl From<WatermarkError> for AppError {
    fn from(err: WatermarkError) -> Self {
        match err {
            // The plaintext already passed its checksum, so the stored file is
            // intact; it just is not a document we know how to mark.
            WatermarkError::InvalidPdf { .. }
            | WatermarkError::InvalidImage { .. }
            | WatermarkError::UnsupportedFormat { .. } => AppError::UnsupportedFormat {
                format: err.to_string(),
            },
            WatermarkError::ExtractionUnavailable => AppError::ExtractionUnavailable,
            WatermarkError::Encode { message } => AppError::Internal { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_common::ErrorKind;

    #[test]
    fn test_conversion_kinds() {
        let unreadable: AppError = WatermarkError::InvalidPdf {
            message: "no trailer".into(),
        }
        .into();
        assert_eq!(unreadable.kind(), ErrorKind::UnsupportedFormat);

        let unavailable: AppError = WatermarkError::ExtractionUnavailable.into();
        assert_eq!(unavailable.status_code().as_u16(), 501);

        let encode: AppError = WatermarkError::Encode {
            message: "disk".into(),
        }
        .into();
        assert_eq!(encode.kind(), ErrorKind::Internal);
    }
}
