//! Tenant lifecycle.
//!
//! Tenants of a branch share schema but not data. A new tenant starts as
//! an empty file and replays the branch change log, the same catch-up path
//! divergent tenants use, so by construction it converges on the branch's
//! applied schema without copying anyone's data.

use cinch_core::{
    validate_name, CinchError, ConnectionContext, Result, MAIN_TENANT,
};
use cinch_storage::{check_maintenance, metadata_store, ProjectLayout};

use crate::Engine;

impl Engine {
    /// Create a tenant on the context's branch from the branch's current
    /// schema.
    pub fn create_tenant(&self, ctx: &ConnectionContext, name: &str) -> Result<()> {
        let tenant = validate_name(name, "tenant")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        let store = metadata_store(&ctx.project_root)?;
        if store.tenant_exists(&ctx.database, &ctx.branch, &tenant)? {
            return Err(CinchError::AlreadyExists(format!(
                "tenant '{tenant}' on branch '{}/{}'",
                ctx.database, ctx.branch
            )));
        }

        // Borrowing creates the file with pragmas applied.
        let layout = ProjectLayout::for_context(ctx);
        let path = layout.tenant_path(&ctx.database, &ctx.branch, &tenant);
        let key = self.key_for(ctx, &tenant);
        drop(self.pool().borrow(&path, key.as_deref())?);

        store.register_tenant(&ctx.database, &ctx.branch, &tenant)?;
        self.catch_up_tenant(ctx, &tenant, &store)?;

        tracing::info!(%tenant, branch = %ctx.branch, "created tenant");
        Ok(())
    }

    /// Delete a tenant and its files. The `main` tenant is undeletable.
    pub fn delete_tenant(&self, ctx: &ConnectionContext, name: &str) -> Result<()> {
        let tenant = validate_name(name, "tenant")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        if tenant == MAIN_TENANT {
            return Err(CinchError::SchemaConflict(
                "the main tenant cannot be deleted".to_string(),
            ));
        }

        let store = metadata_store(&ctx.project_root)?;
        if !store.tenant_exists(&ctx.database, &ctx.branch, &tenant)? {
            return Err(CinchError::NotFound(format!(
                "tenant '{tenant}' on branch '{}/{}'",
                ctx.database, ctx.branch
            )));
        }

        let layout = ProjectLayout::for_context(ctx);
        let path = layout.tenant_path(&ctx.database, &ctx.branch, &tenant);
        self.pool().evict_prefix(&path)?;

        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.clone().into_os_string();
            file.push(suffix);
            let file = std::path::PathBuf::from(file);
            if file.exists() {
                std::fs::remove_file(&file)?;
            }
        }
        store.drop_tenant(&ctx.database, &ctx.branch, &tenant)?;

        tracing::info!(%tenant, branch = %ctx.branch, "deleted tenant");
        Ok(())
    }

    /// Tenant names of the context's branch.
    pub fn list_tenants(&self, ctx: &ConnectionContext) -> Result<Vec<String>> {
        self.ensure_branch(ctx)?;
        let store = metadata_store(&ctx.project_root)?;
        store.list_tenants(&ctx.database, &ctx.branch)
    }
}
