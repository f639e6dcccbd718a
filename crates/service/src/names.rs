//! Database name grammar.
//!
//! Rules are checked in order and the first failure is reported:
//! length 4..=25, leading letter, no trailing underscore, `[A-Za-z0-9_]` only.

use crate::errors::ServiceError;

pub const MIN_NAME_LEN: usize = 4;
pub const MAX_NAME_LEN: usize = 25;

/// Validate a database name. Pure; never touches the registry.
pub fn validate_name(name: &str) -> Result<(), ServiceError> {
    let len = name.chars().count();
    if !(MIN_NAME_LEN..=MAX_NAME_LEN).contains(&len) {
        return Err(ServiceError::InvalidName(format!(
            "Database name must be between {MIN_NAME_LEN} and {MAX_NAME_LEN} characters."
        )));
    }
    if !name.chars().next().is_some_and(char::is_alphabetic) {
        return Err(ServiceError::InvalidName("Database name must start with a letter.".into()));
    }
    if name.ends_with('_') {
        return Err(ServiceError::InvalidName("Database name cannot end with an underscore.".into()));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ServiceError::InvalidName("Database name contains invalid characters.".into()));
    }
    Ok(())
}

/// Validate an optional name as supplied by a caller; absence is its own message.
pub fn require_name(name: Option<&str>) -> Result<&str, ServiceError> {
    match name {
        Some(n) if !n.is_empty() => {
            validate_name(n)?;
            Ok(n)
        }
        _ => Err(ServiceError::InvalidName("Expected a name as an argument.".into())),
    }
}
