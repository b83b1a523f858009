//! Validation helpers for DTOs.

use validator::ValidationError;

/// Maximum nickname length accepted at join time.
pub const MAX_NICKNAME_LENGTH: usize = 15;
/// Length of a session join pin.
pub const PIN_LENGTH: usize = 6;

/// Validates that a join pin is exactly 6 ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_pin("042137") // Ok
/// validate_pin("42137")  // Err - too short
/// validate_pin("4213a7") // Err - not numeric
/// ```
pub fn validate_pin(pin: &str) -> Result<(), ValidationError> {
    if pin.len() != PIN_LENGTH {
        let mut err = ValidationError::new("pin_length");
        err.message =
            Some(format!("Pin must be exactly {PIN_LENGTH} digits (got {})", pin.len()).into());
        return Err(err);
    }

    if !pin.chars().all(|c| c.is_ascii_digit()) {
        let mut err = ValidationError::new("pin_format");
        err.message = Some("Pin must contain only digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a nickname is non-blank and at most 15 characters.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        let mut err = ValidationError::new("nickname_blank");
        err.message = Some("Nickname must not be blank".into());
        return Err(err);
    }

    if nickname.chars().count() > MAX_NICKNAME_LENGTH {
        let mut err = ValidationError::new("nickname_length");
        err.message =
            Some(format!("Nickname must be at most {MAX_NICKNAME_LENGTH} characters").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_pin_valid() {
        assert!(validate_pin("000000").is_ok());
        assert!(validate_pin("123456").is_ok());
        assert!(validate_pin("999999").is_ok());
    }

    #[test]
    fn test_validate_pin_invalid_length() {
        assert!(validate_pin("12345").is_err()); // too short
        assert!(validate_pin("1234567").is_err()); // too long
        assert!(validate_pin("").is_err()); // empty
    }

    #[test]
    fn test_validate_pin_invalid_format() {
        assert!(validate_pin("12345a").is_err());
        assert!(validate_pin("12 456").is_err());
        assert!(validate_pin("１２３４５６").is_err()); // fullwidth digits
    }

    #[test]
    fn test_validate_nickname() {
        assert!(validate_nickname("ada").is_ok());
        assert!(validate_nickname("exactly15chars!").is_ok());
        assert!(validate_nickname("").is_err());
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname("sixteen-chars-xx").is_err());
    }
}
