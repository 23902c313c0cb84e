//! Canonical filesystem layout for a CinchDB project.
//!
//! ```text
//! <root>/.cinchdb/
//!   config.toml
//!   metadata.db
//!   databases/<db>/branches/<branch>/
//!     metadata.json
//!     changes.json
//!     tenants/<tenant>.db
//! ```
//!
//! All components resolve paths through this type; no component
//! concatenates paths on its own.

use std::path::{Path, PathBuf};

use cinch_core::ConnectionContext;

/// Path resolver rooted at a project directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Layout for the project a context addresses.
    pub fn for_context(ctx: &ConnectionContext) -> Self {
        Self::new(&ctx.project_root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cinch_dir(&self) -> PathBuf {
        self.root.join(".cinchdb")
    }

    pub fn config_path(&self) -> PathBuf {
        self.cinch_dir().join("config.toml")
    }

    pub fn metadata_db_path(&self) -> PathBuf {
        self.cinch_dir().join("metadata.db")
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.cinch_dir().join("databases")
    }

    pub fn database_dir(&self, database: &str) -> PathBuf {
        self.databases_dir().join(database)
    }

    pub fn branches_dir(&self, database: &str) -> PathBuf {
        self.database_dir(database).join("branches")
    }

    pub fn branch_dir(&self, database: &str, branch: &str) -> PathBuf {
        self.branches_dir(database).join(branch)
    }

    pub fn branch_metadata_path(&self, database: &str, branch: &str) -> PathBuf {
        self.branch_dir(database, branch).join("metadata.json")
    }

    pub fn changes_path(&self, database: &str, branch: &str) -> PathBuf {
        self.branch_dir(database, branch).join("changes.json")
    }

    /// Advisory lock file guarding appends to `changes.json`.
    pub fn changes_lock_path(&self, database: &str, branch: &str) -> PathBuf {
        self.branch_dir(database, branch).join(".changes.lock")
    }

    pub fn tenants_dir(&self, database: &str, branch: &str) -> PathBuf {
        self.branch_dir(database, branch).join("tenants")
    }

    pub fn tenant_path(&self, database: &str, branch: &str, tenant: &str) -> PathBuf {
        self.tenants_dir(database, branch).join(format!("{tenant}.db"))
    }

    /// Tenant file the context addresses.
    pub fn tenant_path_for(&self, ctx: &ConnectionContext) -> PathBuf {
        self.tenant_path(&ctx.database, &ctx.branch, ctx.tenant_name())
    }
}
