//! SQL statement classification.
//!
//! The query executor accepts plain reads and writes only; DDL must go
//! through the schema managers so that every schema mutation lands in the
//! branch change log. Classification is by leading keyword after stripping
//! comments, which is sufficient because statements reaching the executor
//! are single statements by construction.

use crate::{CinchError, Result};

/// Coarse statement kind as seen by the query executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    /// SELECT and other row-returning statements.
    Read,
    /// INSERT, UPDATE, DELETE, REPLACE.
    Write,
    /// Schema or transaction control; rejected by the executor.
    Ddl,
}

/// Classify a single SQL statement.
///
/// Rejects empty input and multi-statement strings. `WITH` is treated as a
/// read unless the body contains a write keyword.
pub fn classify_sql(sql: &str) -> Result<SqlKind> {
    let body = strip_leading_comments(sql);
    let trimmed = body.trim().trim_end_matches(';').trim();

    if trimmed.is_empty() {
        return Err(CinchError::SqlValidation("empty SQL statement".into()));
    }

    if trimmed.contains(';') {
        return Err(CinchError::SqlValidation(
            "multiple SQL statements are not allowed".into(),
        ));
    }

    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    let kind = match first.as_str() {
        "SELECT" | "VALUES" | "EXPLAIN" => SqlKind::Read,
        "WITH" => {
            let upper = trimmed.to_ascii_uppercase();
            if ["INSERT", "UPDATE", "DELETE", "REPLACE"]
                .iter()
                .any(|kw| contains_keyword(&upper, kw))
            {
                SqlKind::Write
            } else {
                SqlKind::Read
            }
        }
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => SqlKind::Write,
        _ => SqlKind::Ddl,
    };

    Ok(kind)
}

/// Validate that `sql` is a read statement for `execute`.
pub fn validate_read_query(sql: &str) -> Result<()> {
    match classify_sql(sql)? {
        SqlKind::Read => Ok(()),
        SqlKind::Write => Err(CinchError::SqlValidation(
            "write statement passed to execute; use execute_write".into(),
        )),
        SqlKind::Ddl => Err(CinchError::SqlValidation(
            "DDL is not allowed here; use the schema managers".into(),
        )),
    }
}

/// Validate that `sql` is a write statement for `execute_write`.
pub fn validate_write_statement(sql: &str) -> Result<()> {
    match classify_sql(sql)? {
        SqlKind::Write => Ok(()),
        SqlKind::Read => Err(CinchError::SqlValidation(
            "read statement passed to execute_write; use execute".into(),
        )),
        SqlKind::Ddl => Err(CinchError::SqlValidation(
            "DDL is not allowed here; use the schema managers".into(),
        )),
    }
}

/// Validate that view SQL is a plain read.
pub fn validate_view_sql(sql: &str) -> Result<()> {
    match classify_sql(sql)? {
        SqlKind::Read => Ok(()),
        _ => Err(CinchError::SqlValidation(
            "view SQL must be a read-only SELECT".into(),
        )),
    }
}

fn strip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(stripped) = rest.strip_prefix("--") {
            rest = match stripped.find('\n') {
                Some(pos) => stripped[pos + 1..].trim_start(),
                None => "",
            };
        } else if let Some(stripped) = rest.strip_prefix("/*") {
            rest = match stripped.find("*/") {
                Some(pos) => stripped[pos + 2..].trim_start(),
                None => "",
            };
        } else {
            return rest;
        }
    }
}

fn contains_keyword(upper_sql: &str, keyword: &str) -> bool {
    upper_sql.match_indices(keyword).any(|(idx, _)| {
        let before = upper_sql[..idx].chars().next_back();
        let after = upper_sql[idx + keyword.len()..].chars().next();
        let boundary = |c: Option<char>| c.is_none_or(|c| !c.is_alphanumeric() && c != '_');
        boundary(before) && boundary(after)
    })
}
