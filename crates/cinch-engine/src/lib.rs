//! CinchDB Engine
//!
//! Branch, tenant, schema, and query operations over the storage layer.
//! The [`Engine`] owns the process-wide connection pool; every operation
//! is parameterized by a [`ConnectionContext`] naming the (project,
//! database, branch, tenant) it addresses.

use std::path::Path;
use std::sync::Arc;

use cinch_core::{validate_name, CinchError, ConnectionContext, Result};
use cinch_storage::{ConnectionPool, KeyProvider, PooledConnection, ProjectLayout};

mod apply;
pub mod branch;
pub mod columns;
pub mod fanout;
pub mod project;
pub mod query;
pub mod schema;
pub mod tables;
pub mod tenants;
pub mod views;

pub use branch::MergeOutcome;
pub use project::{Config, ProjectConfig};
pub use query::QueryParams;
pub use schema::{TableColumn, TableInfo, ViewInfo};

/// The engine: operations plus the injected collaborators they share.
///
/// One engine per process is the expected shape; tests may build as many
/// as they like. [`Engine::close_all`] must be called on teardown so no
/// pooled connection outlives the test.
pub struct Engine {
    pool: Arc<ConnectionPool>,
    keys: Option<Arc<dyn KeyProvider>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_pool(Arc::new(ConnectionPool::default()))
    }

    pub fn with_pool(pool: Arc<ConnectionPool>) -> Self {
        Self { pool, keys: None }
    }

    /// Install an opaque encryption key provider consulted per tenant.
    pub fn with_key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Close every pooled connection and cached metadata handle.
    pub fn close_all(&self) {
        self.pool.close_all();
        cinch_storage::close_all_metadata();
    }

    /// Keying material for a tenant: explicit context key first, then the
    /// installed provider.
    pub(crate) fn key_for(&self, ctx: &ConnectionContext, tenant: &str) -> Option<Vec<u8>> {
        ctx.encryption_key.clone().or_else(|| {
            self.keys
                .as_ref()
                .and_then(|keys| keys.get_key(&ctx.database, &ctx.branch, tenant))
        })
    }

    /// Borrow the connection for a named tenant of the context's branch.
    ///
    /// The tenant name is validated here, before it becomes a path
    /// component: contexts can carry caller-supplied tenant strings (e.g.
    /// from the HTTP layer), and the name rule is what keeps them from
    /// addressing files outside the branch's `tenants/` directory.
    pub(crate) fn borrow_tenant(
        &self,
        ctx: &ConnectionContext,
        tenant: &str,
    ) -> Result<PooledConnection> {
        let tenant = validate_name(tenant, "tenant")?;
        let layout = ProjectLayout::for_context(ctx);
        let path = layout.tenant_path(&ctx.database, &ctx.branch, &tenant);
        if !path.exists() {
            return Err(CinchError::NotFound(format!(
                "tenant '{tenant}' on branch '{}/{}'",
                ctx.database, ctx.branch
            )));
        }
        let key = self.key_for(ctx, &tenant);
        self.pool.borrow(&path, key.as_deref())
    }

    /// Borrow the connection for the tenant the context addresses.
    pub(crate) fn borrow_context_tenant(&self, ctx: &ConnectionContext) -> Result<PooledConnection> {
        self.borrow_tenant(ctx, ctx.tenant_name())
    }

    /// Fail with `NotFound` unless the context's branch exists on disk.
    pub(crate) fn ensure_branch(&self, ctx: &ConnectionContext) -> Result<()> {
        ensure_branch_at(&ctx.project_root, &ctx.database, &ctx.branch)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn ensure_branch_at(project_root: &Path, database: &str, branch: &str) -> Result<()> {
    let layout = ProjectLayout::new(project_root);
    if !layout.database_dir(database).exists() {
        return Err(CinchError::NotFound(format!("database '{database}'")));
    }
    if !layout.branch_dir(database, branch).exists() {
        return Err(CinchError::NotFound(format!(
            "branch '{database}/{branch}'"
        )));
    }
    Ok(())
}
