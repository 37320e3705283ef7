// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Signup input validation.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321 SMTP limit

static USERNAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]{3,50}$").unwrap_or_else(|e| panic!("username pattern: {e}"))
});
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .unwrap_or_else(|e| panic!("email pattern: {e}"))
});

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

impl ValidationError {
    /// Message shown to the client
    pub fn client_message(&self) -> &'static str {
        match self {
            ValidationError::InvalidEmail(_) => "invalid email, could not authorize user",
            ValidationError::InvalidUsername(_) => "invalid username, could not authorize user",
        }
    }
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trim and lower-case an email address
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Validate an email address, returning its normalized form
pub fn validate_email(email: &str) -> ValidationResult<String> {
    let email = normalize_email(email);

    if email.is_empty() {
        return Err(ValidationError::InvalidEmail(
            "Email must not be empty".to_string(),
        ));
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::InvalidEmail(format!(
            "Email cannot exceed {MAX_EMAIL_LENGTH} characters"
        )));
    }

    if !EMAIL_REGEX.is_match(&email) {
        return Err(ValidationError::InvalidEmail(
            "Email is not a valid address".to_string(),
        ));
    }

    Ok(email)
}

/// Validate a username
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::InvalidUsername(
            "Username must be 3-50 characters of letters, digits, '.', '_' or '-'".to_string(),
        ));
    }
    Ok(username)
}

pub fn is_valid_username(username: &str) -> bool {
    validate_username(username).is_ok()
}
