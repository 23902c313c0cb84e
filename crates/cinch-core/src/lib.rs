//! CinchDB Core
//!
//! Core types, error taxonomy, and validation for the CinchDB branch/tenant
//! storage engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod change;
pub mod ids;
pub mod sql;
pub mod validation;
pub mod value;

pub use change::{Change, ChangePayload};
pub use ids::ChangeId;
pub use sql::{classify_sql, SqlKind};
pub use validation::{is_valid_name, validate_name};
pub use value::{Row, Value};

/// Errors that can occur in CinchDB operations
#[derive(Debug, thiserror::Error)]
pub enum CinchError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("SQL validation failed: {0}")]
    SqlValidation(String),

    #[error("{0}")]
    Maintenance(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("merge conflict: {message}")]
    MergeConflict {
        message: String,
        conflicting: Vec<ChangeId>,
    },

    #[error("tenant '{tenant}' divergent: {message}")]
    TenantDivergent { tenant: String, message: String },

    #[error("concurrency error: {0}")]
    Concurrency(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error during {operation}: {message}")]
    Storage { operation: String, message: String },
}

impl CinchError {
    /// Wrap an underlying failure with the operation that was in flight.
    pub fn storage(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Storage {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

/// Result type for CinchDB operations
pub type Result<T> = std::result::Result<T, CinchError>;

/// SQLite column affinity accepted for user-declared columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Blob,
    Numeric,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
            Self::Numeric => "NUMERIC",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ColumnType {
    type Err = CinchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Ok(Self::Text),
            "INTEGER" => Ok(Self::Integer),
            "REAL" => Ok(Self::Real),
            "BLOB" => Ok(Self::Blob),
            "NUMERIC" => Ok(Self::Numeric),
            other => Err(CinchError::InvalidName(format!(
                "unknown column type '{other}' (expected TEXT, INTEGER, REAL, BLOB, or NUMERIC)"
            ))),
        }
    }
}

/// A user-declared column in a table definition.
///
/// The implicit `id`, `created_at`, and `updated_at` columns are added by the
/// engine and must not appear here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: ColumnType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            col_type,
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Immutable addressing value for a (project, database, branch, tenant).
///
/// Managers and the query executor are parameterized by a context rather
/// than by loose arguments; the optional encryption key is opaque keying
/// material handed to the connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub project_root: PathBuf,
    pub database: String,
    pub branch: String,
    pub tenant: Option<String>,
    pub encryption_key: Option<Vec<u8>>,
}

impl ConnectionContext {
    pub fn new(
        project_root: impl AsRef<Path>,
        database: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            project_root: project_root.as_ref().to_path_buf(),
            database: database.into(),
            branch: branch.into(),
            tenant: None,
            encryption_key: None,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_encryption_key(mut self, key: Vec<u8>) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// The addressed tenant, defaulting to `main`.
    pub fn tenant_name(&self) -> &str {
        self.tenant.as_deref().unwrap_or(MAIN_TENANT)
    }
}

/// The root branch every database starts with.
pub const MAIN_BRANCH: &str = "main";

/// The tenant every branch starts with.
pub const MAIN_TENANT: &str = "main";
