use crate::errors::{AppError, AppResult};
use once_cell::sync::Lazy;
use regex::Regex;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:@|\-]{0,127}$").expect("valid regex"));

/// Serialised placeholders that leaked out of the browser client as real ids.
const PLACEHOLDER_IDS: [&str; 3] = ["undefined", "null", "none"];

pub fn validate_user_id(user_id: &str) -> AppResult<()> {
    validate_identifier("user id", user_id)
}

pub fn validate_group_id(group_id: &str) -> AppResult<()> {
    validate_identifier("group id", group_id)
}

pub fn validate_email(email: &str) -> AppResult<()> {
    let trimmed = email.trim();
    if trimmed.is_empty() || !trimmed.contains('@') {
        return Err(AppError::Validation(format!("Invalid email provided: '{}'", email)));
    }
    Ok(())
}

fn validate_identifier(kind: &str, raw: &str) -> AppResult<()> {
    if PLACEHOLDER_IDS.iter().any(|placeholder| raw.eq_ignore_ascii_case(placeholder)) {
        return Err(AppError::Validation(format!("Invalid {} provided: '{}'", kind, raw)));
    }
    if !IDENTIFIER_PATTERN.is_match(raw) {
        return Err(AppError::Validation(format!("Invalid {} provided: '{}'", kind, raw)));
    }
    Ok(())
}

pub fn new_group_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::{new_group_id, validate_email, validate_group_id, validate_user_id};

    #[test]
    fn accepts_provider_style_ids() {
        assert!(validate_user_id("6f1c2d4e-8a9b-4c3d-9e2f-1a2b3c4d5e6f").is_ok());
        assert!(validate_user_id("auth0|abc123").is_ok());
        assert!(validate_group_id(&new_group_id()).is_ok());
    }

    #[test]
    fn rejects_empty_and_placeholder_ids() {
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("   ").is_err());
        assert!(validate_user_id("undefined").is_err());
        assert!(validate_user_id("NULL").is_err());
        assert!(validate_user_id("a b").is_err());
    }

    #[test]
    fn email_needs_an_at_sign() {
        assert!(validate_email("owner@practice.co.uk").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("owner").is_err());
    }
}
