//! Input validation for API requests.
//!
//! Validation functions return `Result<(), String>` so callers can attach the
//! message to the right field via `ApiError::validation_field` or collect
//! several with `ValidationErrorBuilder`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Usernames: lowercase alphanumeric with dots/underscores, 3-32 chars
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[a-z0-9][a-z0-9._]{2,31}$").unwrap();

    /// Class codes like "CS101" or "MATH-201A"
    static ref CLASS_CODE_REGEX: Regex = Regex::new(r"^[A-Z]{2,6}-?[0-9]{2,4}[A-Z]?$").unwrap();

    /// Minimal email shape; real validation happens at the SMTP relay
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"^[^@\s]+@[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)+$").unwrap();
}

/// Validate a login username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username must be 3-32 lowercase letters, digits, dots or underscores".to_string(),
        );
    }

    Ok(())
}

/// Validate a class code
pub fn validate_class_code(code: &str) -> Result<(), String> {
    if code.is_empty() {
        return Err("Class code is required".to_string());
    }

    if !CLASS_CODE_REGEX.is_match(code) {
        return Err("Class code must look like CS101 or MATH-201A".to_string());
    }

    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email address".to_string());
    }

    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    Ok(())
}

/// Validate that an ID is a well-formed UUID
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| format!("{} must be a valid UUID", field_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_username() {
        assert!(validate_username("jdoe").is_ok());
        assert!(validate_username("j.doe_42").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("JDoe").is_err());
        assert!(validate_username("has space").is_err());
    }

    #[test]
    fn test_validate_class_code() {
        assert!(validate_class_code("CS101").is_ok());
        assert!(validate_class_code("MATH-201A").is_ok());
        assert!(validate_class_code("PHYS2001").is_ok());
        assert!(validate_class_code("").is_err());
        assert!(validate_class_code("cs101").is_err());
        assert!(validate_class_code("101CS").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("student@example.com").is_ok());
        assert!(validate_email("a.b+c@dept.uni.edu").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("missing@tld").is_err());
    }

    #[test]
    fn test_validate_password() {
        assert!(validate_password("longenough1").is_ok());
        assert!(validate_password("short").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "id").is_ok());
        assert!(validate_uuid("nope", "id").is_err());
    }
}
