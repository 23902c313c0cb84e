//! Branch operations: create, delete, merge.
//!
//! Branch creation snapshots the source under a branch-maintenance window
//! and copies tenant files through the SQLite online backup API, which is
//! WAL-safe where a plain file copy is not. Merge computes the longest
//! common prefix of two change logs by content; source changes past the
//! prefix are re-stamped onto the target and fanned out.

use std::time::Duration;

use rusqlite::backup::Backup;
use rusqlite::Connection;

use cinch_core::{
    validate_name, Change, ChangeId, CinchError, ConnectionContext, Result, MAIN_BRANCH,
};
use cinch_storage::{
    check_maintenance, maintenance_delay, metadata::branch_key, metadata_store, BranchMetadata,
    ChangeLog, MaintenanceScope, ProjectLayout,
};

use crate::Engine;

/// Result of a merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Ids the merged changes received on the target branch; empty when
    /// the merge was a no-op.
    pub applied: Vec<ChangeId>,
}

impl Engine {
    /// Create `new_name` as a copy of `from_branch`.
    ///
    /// The source enters branch maintenance for the duration of the copy
    /// so its tenants are quiescent while their files are snapshotted.
    pub fn create_branch(
        &self,
        ctx: &ConnectionContext,
        from_branch: &str,
        new_name: &str,
    ) -> Result<()> {
        let source = validate_name(from_branch, "branch")?;
        let target = validate_name(new_name, "branch")?;
        crate::ensure_branch_at(&ctx.project_root, &ctx.database, &source)?;

        let layout = ProjectLayout::for_context(ctx);
        if layout.branch_dir(&ctx.database, &target).exists() {
            return Err(CinchError::AlreadyExists(format!(
                "branch '{}/{target}'",
                ctx.database
            )));
        }
        check_maintenance(&ctx.project_root, &ctx.database, Some(&source))?;

        let store = metadata_store(&ctx.project_root)?;
        let key = branch_key(&ctx.database, &source);
        store.enter_maintenance(MaintenanceScope::Branch, &key, "branch copy in progress")?;
        maintenance_delay();

        let copied = self.copy_branch(ctx, &source, &target);

        store.exit_maintenance(MaintenanceScope::Branch, &key)?;
        copied?;

        store.register_branch(&ctx.database, &target, Some(&source))?;
        tracing::info!(database = %ctx.database, %source, %target, "created branch");
        Ok(())
    }

    fn copy_branch(&self, ctx: &ConnectionContext, source: &str, target: &str) -> Result<()> {
        let layout = ProjectLayout::for_context(ctx);
        let store = metadata_store(&ctx.project_root)?;

        let source_log = ChangeLog::for_branch(&layout, &ctx.database, source);
        let changes = source_log.read()?;

        std::fs::create_dir_all(layout.tenants_dir(&ctx.database, target))?;
        ChangeLog::for_branch(&layout, &ctx.database, target).init_with(&changes)?;
        BranchMetadata::new(Some(source.to_string()))
            .save(&layout.branch_metadata_path(&ctx.database, target))?;

        for tenant in store.list_tenants(&ctx.database, source)? {
            let src_path = layout.tenant_path(&ctx.database, source, &tenant);
            let dst_path = layout.tenant_path(&ctx.database, target, &tenant);

            let source_ctx = ConnectionContext::new(&ctx.project_root, &*ctx.database, source);
            let key = self.key_for(&source_ctx, &tenant);
            let src = self.pool().borrow(&src_path, key.as_deref())?;

            let mut dst = Connection::open(&dst_path)
                .map_err(|e| CinchError::storage(format!("open {}", dst_path.display()), e))?;
            {
                let backup = Backup::new(&src, &mut dst)?;
                backup.run_to_completion(64, Duration::from_millis(5), None)?;
            }
            drop(src);

            store.register_tenant(&ctx.database, target, &tenant)?;
            if let Some(version) = store.get_schema_version(&ctx.database, source, &tenant)? {
                store.set_schema_version(&ctx.database, target, &tenant, version)?;
            }
        }
        Ok(())
    }

    /// Delete a branch and its subtree.
    ///
    /// Refuses for `main`, and refuses while any tenant connection of the
    /// branch is borrowed from the pool.
    pub fn delete_branch(&self, ctx: &ConnectionContext, name: &str) -> Result<()> {
        let branch = validate_name(name, "branch")?;
        if branch == MAIN_BRANCH {
            return Err(CinchError::SchemaConflict(
                "the main branch cannot be deleted".to_string(),
            ));
        }
        crate::ensure_branch_at(&ctx.project_root, &ctx.database, &branch)?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&branch))?;

        let layout = ProjectLayout::for_context(ctx);
        let branch_dir = layout.branch_dir(&ctx.database, &branch);

        if self.pool().has_live_borrows(&branch_dir) {
            return Err(CinchError::Concurrency(format!(
                "branch '{}/{branch}' has tenant connections in use",
                ctx.database
            )));
        }
        self.pool().evict_prefix(&branch_dir)?;

        std::fs::remove_dir_all(&branch_dir)?;

        let store = metadata_store(&ctx.project_root)?;
        store.drop_branch(&ctx.database, &branch)?;
        store.exit_maintenance(MaintenanceScope::Branch, &branch_key(&ctx.database, &branch))?;

        tracing::info!(database = %ctx.database, %branch, "deleted branch");
        Ok(())
    }

    /// Merge `source_branch` into `target_branch`.
    ///
    /// Source changes past the logs' longest common prefix are re-stamped
    /// onto the target and fanned out. If the target has its own changes
    /// past the prefix the merge fails with `MergeConflict`; no tenant of
    /// the target is mutated.
    pub fn merge_branches(
        &self,
        ctx: &ConnectionContext,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<MergeOutcome> {
        let source = validate_name(source_branch, "branch")?;
        let target = validate_name(target_branch, "branch")?;
        crate::ensure_branch_at(&ctx.project_root, &ctx.database, &source)?;
        crate::ensure_branch_at(&ctx.project_root, &ctx.database, &target)?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&target))?;

        let layout = ProjectLayout::for_context(ctx);
        let source_log = ChangeLog::for_branch(&layout, &ctx.database, &source);
        let target_log = ChangeLog::for_branch(&layout, &ctx.database, &target);
        let source_changes = source_log.read()?;
        let target_changes = target_log.read()?;

        let prefix = common_prefix_len(&source_changes, &target_changes);
        let merge_set = &source_changes[prefix..];
        let conflict_set = &target_changes[prefix..];

        if !conflict_set.is_empty() {
            let conflicting = merge_set
                .iter()
                .chain(conflict_set)
                .map(|c| c.id)
                .collect();
            return Err(CinchError::MergeConflict {
                message: format!(
                    "branches '{source}' and '{target}' diverge after {prefix} shared change(s)"
                ),
                conflicting,
            });
        }

        if merge_set.is_empty() {
            return Ok(MergeOutcome { applied: Vec::new() });
        }

        let mut applied = Vec::with_capacity(merge_set.len());
        let target_ctx = ConnectionContext::new(&ctx.project_root, &*ctx.database, &*target);
        for change in merge_set {
            // Re-stamped so target ids stay monotonic.
            let committed = target_log.commit(change.payload.clone())?;
            applied.push(committed.id);
        }
        self.fan_out(&target_ctx)?;

        tracing::info!(
            database = %ctx.database, %source, %target,
            merged = applied.len(), "merged branches"
        );
        Ok(MergeOutcome { applied })
    }

    /// Branch names of the context's database.
    pub fn list_branches(&self, ctx: &ConnectionContext) -> Result<Vec<String>> {
        let store = metadata_store(&ctx.project_root)?;
        if !store.database_exists(&ctx.database)? {
            return Err(CinchError::NotFound(format!("database '{}'", ctx.database)));
        }
        store.list_branches(&ctx.database)
    }

    /// Databases of the context's project.
    pub fn list_databases(&self, ctx: &ConnectionContext) -> Result<Vec<String>> {
        let store = metadata_store(&ctx.project_root)?;
        store.list_databases()
    }
}

/// Longest shared prefix of two logs, comparing change content rather
/// than ids so re-stamped merges still match their origin.
fn common_prefix_len(a: &[Change], b: &[Change]) -> usize {
    a.iter()
        .zip(b.iter())
        .take_while(|(x, y)| x.same_content(y))
        .count()
}
