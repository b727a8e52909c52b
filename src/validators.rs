/// Input validators
///
/// Everything the transport hands to the session engine passes through here
/// first. Failures surface as `InvalidArgument`.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use crate::error::ValidationError;

const MAX_LOGIN_LENGTH: usize = 64;
const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_DEVICE_CODE_LENGTH: usize = 128;

lazy_static! {
    static ref LOGIN_REGEX: Regex = Regex::new(r"^[A-Za-z0-9._@-]+$").unwrap();

    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).unwrap();
}

/// Validates a login and returns it trimmed
pub fn is_valid_login(login: &str) -> Result<String, ValidationError> {
    let trimmed = login.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("login"));
    }

    if trimmed.chars().count() > MAX_LOGIN_LENGTH {
        return Err(ValidationError::TooLong("login", MAX_LOGIN_LENGTH));
    }

    if !LOGIN_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("login"));
    }

    Ok(trimmed.to_string())
}

/// Validates an email address and returns it trimmed
pub fn is_valid_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email"));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email", MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email"));
    }

    Ok(trimmed.to_string())
}

/// Passwords are taken verbatim; only emptiness and size are checked.
pub fn is_valid_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password"));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password", MAX_PASSWORD_LENGTH));
    }

    Ok(())
}

/// Validates an opaque device code
pub fn is_valid_device_code(device_code: &str) -> Result<(), ValidationError> {
    if device_code.is_empty() {
        return Err(ValidationError::EmptyField("device code"));
    }

    if device_code.chars().count() > MAX_DEVICE_CODE_LENGTH {
        return Err(ValidationError::TooLong("device code", MAX_DEVICE_CODE_LENGTH));
    }

    if device_code.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidFormat("device code"));
    }

    Ok(())
}

/// Parses a UUID identifier supplied by the caller
pub fn parse_identifier(value: &str, field: &'static str) -> Result<Uuid, ValidationError> {
    Uuid::parse_str(value.trim()).map_err(|_| ValidationError::InvalidIdentifier(field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_logins() {
        for login in ["alice", "bob.smith", "carol_99", "dave@example.com", "  eve  "] {
            assert!(is_valid_login(login).is_ok(), "should accept {}", login);
        }
        assert_eq!(is_valid_login("  eve  ").unwrap(), "eve");
    }

    #[test]
    fn test_invalid_logins() {
        assert_eq!(is_valid_login("   "), Err(ValidationError::EmptyField("login")));
        assert_eq!(
            is_valid_login(&"a".repeat(MAX_LOGIN_LENGTH + 1)),
            Err(ValidationError::TooLong("login", MAX_LOGIN_LENGTH))
        );
        assert_eq!(
            is_valid_login("al ice"),
            Err(ValidationError::InvalidFormat("login"))
        );
        assert_eq!(
            is_valid_login("robert'); DROP TABLE"),
            Err(ValidationError::InvalidFormat("login"))
        );
    }

    #[test]
    fn test_email_validation() {
        assert_eq!(is_valid_email(" a@x.com ").unwrap(), "a@x.com");
        assert!(is_valid_email("notanemail").is_err());
        assert!(is_valid_email("user@").is_err());
        assert!(is_valid_email("@example.com").is_err());
        assert!(is_valid_email("").is_err());
    }

    #[test]
    fn test_password_validation() {
        assert!(is_valid_password("pw1").is_ok());
        assert_eq!(is_valid_password(""), Err(ValidationError::EmptyField("password")));
        assert!(is_valid_password(&"x".repeat(MAX_PASSWORD_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_device_code_validation() {
        assert!(is_valid_device_code("deviceX").is_ok());
        assert!(is_valid_device_code("3f2a-ios-17").is_ok());
        assert!(is_valid_device_code("").is_err());
        assert!(is_valid_device_code("device X").is_err());
        assert!(is_valid_device_code("dev\u{0}ice").is_err());
    }

    #[test]
    fn test_parse_identifier() {
        let id = Uuid::new_v4();
        assert_eq!(parse_identifier(&id.to_string(), "user id").unwrap(), id);
        assert_eq!(
            parse_identifier("not-a-uuid", "user id"),
            Err(ValidationError::InvalidIdentifier("user id"))
        );
    }
}
