//! Watermark text construction

use crate::Attribution;
use scriptorium_common::models::WatermarkSettings;

const SEPARATOR: &str = " | ";
const SHORT_ID_LEN: usize = 8;

/// Build the primary mark: `[institution |] name | email | YYYY-MM-DD | short id`.
///
/// `include_user_id = false` drops name and email, `include_timestamp = false`
/// drops the date. The short watermark id is always present.
pub fn watermark_text(attribution: &Attribution, settings: &WatermarkSettings) -> String {
    let mut segments: Vec<String> = Vec::with_capacity(5);

    if let Some(institution) = attribution.institution.as_deref().map(str::trim) {
        if !institution.is_empty() {
            segments.push(institution.to_string());
        }
    }
    if settings.include_user_id {
        segments.push(attribution.user_name.clone());
        segments.push(attribution.user_email.clone());
    }
    if settings.include_timestamp {
        segments.push(attribution.timestamp.format("%Y-%m-%d").to_string());
    }
    segments.push(short_id(&attribution.watermark_id));

    segments.join(SEPARATOR)
}

/// First eight characters of a watermark id
pub(crate) fn short_id(watermark_id: &str) -> String {
    watermark_id.chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn attribution(institution: Option<&str>) -> Attribution {
        Attribution {
            user_id: Uuid::new_v4(),
            user_email: "jane@example.edu".into(),
            user_name: "Jane Doe".into(),
            watermark_id: "abcdefgh-1234".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            institution: institution.map(str::to_string),
        }
    }

    #[test]
    fn test_exact_text() {
        let settings = WatermarkSettings::with_text("Scriptorium");
        assert_eq!(
            watermark_text(&attribution(Some("Inst")), &settings),
            "Inst | Jane Doe | jane@example.edu | 2024-01-15 | abcdefgh"
        );
    }

    #[test]
    fn test_institution_omitted_when_absent() {
        let settings = WatermarkSettings::with_text("Scriptorium");
        assert_eq!(
            watermark_text(&attribution(None), &settings),
            "Jane Doe | jane@example.edu | 2024-01-15 | abcdefgh"
        );
        assert_eq!(
            watermark_text(&attribution(Some("  ")), &settings),
            "Jane Doe | jane@example.edu | 2024-01-15 | abcdefgh"
        );
    }

    #[test]
    fn test_include_flags() {
        let mut settings = WatermarkSettings::with_text("Scriptorium");
        settings.include_user_id = false;
        settings.include_timestamp = false;
        assert_eq!(watermark_text(&attribution(Some("Inst")), &settings), "Inst | abcdefgh");
    }

    #[test]
    fn test_short_id_of_short_input() {
        assert_eq!(short_id("abc"), "abc");
    }
}
