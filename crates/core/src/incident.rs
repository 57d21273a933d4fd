//! Incident field rules shared by creation, edits and field-update actions.

use crate::error::CoreError;

/// Lowest (most urgent) priority/severity level.
pub const MIN_LEVEL: i16 = 1;

/// Highest (least urgent) priority/severity level.
pub const MAX_LEVEL: i16 = 5;

/// Priority and severity default when the caller omits them.
pub const DEFAULT_LEVEL: i16 = 3;

/// Prefix of the human-readable incident number.
pub const INCIDENT_NUMBER_PREFIX: &str = "INC";

/// Validate a priority or severity value.
pub fn validate_level(field: &str, value: i16) -> Result<(), CoreError> {
    if (MIN_LEVEL..=MAX_LEVEL).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "{field} must be between {MIN_LEVEL} and {MAX_LEVEL}, got {value}"
        )))
    }
}

/// Format a sequence value as `INC-000042`.
pub fn format_incident_number(sequence: i64) -> String {
    format!("{INCIDENT_NUMBER_PREFIX}-{sequence:06}")
}

/// Validate an incident title.
pub fn validate_title(title: &str) -> Result<(), CoreError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Title must not be empty".to_string()));
    }
    if trimmed.chars().count() > 255 {
        return Err(CoreError::Validation(
            "Title must be at most 255 characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_inside_range_pass() {
        for v in MIN_LEVEL..=MAX_LEVEL {
            assert!(validate_level("priority", v).is_ok());
        }
    }

    #[test]
    fn levels_outside_range_fail() {
        assert!(validate_level("priority", 0).is_err());
        let err = validate_level("severity", 6).unwrap_err();
        assert!(err.to_string().contains("severity must be between 1 and 5"));
    }

    #[test]
    fn default_level_is_three() {
        assert_eq!(DEFAULT_LEVEL, 3);
    }

    #[test]
    fn incident_number_is_zero_padded() {
        assert_eq!(format_incident_number(42), "INC-000042");
        assert_eq!(format_incident_number(1_234_567), "INC-1234567");
    }

    #[test]
    fn blank_title_is_rejected() {
        assert!(validate_title("  ").is_err());
        assert!(validate_title("Printer on fire").is_ok());
    }
}
