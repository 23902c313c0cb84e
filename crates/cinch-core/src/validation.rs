//! Identifier validation for CinchDB
//!
//! Database, branch, tenant, table, column, and view names all share one
//! rule: `^[A-Za-z_][A-Za-z0-9_]{0,62}$`, case-sensitive, trimmed before
//! validation. Names with the reserved `sqlite_` prefix are rejected.

use lazy_static::lazy_static;
use regex::Regex;

use crate::{CinchError, Result};

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap();
}

/// Columns the engine manages itself; callers may not declare or drop them.
pub const SYSTEM_COLUMNS: &[&str] = &["id", "created_at", "updated_at"];

/// Validate an entity name, returning the normalized (trimmed) form.
///
/// `what` names the entity kind for the error message ("table", "branch", ...).
pub fn validate_name(raw: &str, what: &str) -> Result<String> {
    let name = raw.trim();

    if name.is_empty() {
        return Err(CinchError::InvalidName(format!("{what} name cannot be empty")));
    }

    if !NAME_RE.is_match(name) {
        return Err(CinchError::InvalidName(format!(
            "invalid {what} name '{name}': must start with a letter or underscore, \
             contain only letters, digits, and underscores, and be at most 63 characters"
        )));
    }

    if name.to_ascii_lowercase().starts_with("sqlite_") {
        return Err(CinchError::InvalidName(format!(
            "invalid {what} name '{name}': the sqlite_ prefix is reserved"
        )));
    }

    Ok(name.to_string())
}

/// Non-erroring form of [`validate_name`].
pub fn is_valid_name(raw: &str) -> bool {
    validate_name(raw, "entity").is_ok()
}

/// Whether `name` is one of the engine-managed system columns.
pub fn is_system_column(name: &str) -> bool {
    SYSTEM_COLUMNS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        assert_eq!(validate_name("users", "table").unwrap(), "users");
        assert_eq!(validate_name("  users  ", "table").unwrap(), "users");
        assert!(validate_name("_private", "table").is_ok());
        assert!(validate_name("Users2", "table").is_ok());
        assert!(validate_name("a", "table").is_ok());
        assert!(validate_name(&"a".repeat(63), "table").is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_name("", "table").is_err());
        assert!(validate_name("   ", "table").is_err());
        assert!(validate_name("2users", "table").is_err());
        assert!(validate_name("my-table", "table").is_err());
        assert!(validate_name("my table", "table").is_err());
        assert!(validate_name("users;drop", "table").is_err());
        assert!(validate_name(&"a".repeat(64), "table").is_err());
        assert!(validate_name("sqlite_master", "table").is_err());
        assert!(validate_name("SQLITE_seq", "table").is_err());
    }

    #[test]
    fn test_case_sensitive() {
        // Distinct names; both individually valid.
        assert_eq!(validate_name("Users", "table").unwrap(), "Users");
        assert_eq!(validate_name("users", "table").unwrap(), "users");
    }

    #[test]
    fn test_system_columns() {
        assert!(is_system_column("id"));
        assert!(is_system_column("created_at"));
        assert!(is_system_column("updated_at"));
        assert!(!is_system_column("email"));
    }
}
