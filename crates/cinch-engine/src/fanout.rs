//! Tenant fanout.
//!
//! Applies committed changes to every tenant of a branch with bounded
//! parallelism. Each tenant catches up independently: the ordered suffix
//! of the change log past its `schema_version` is replayed change by
//! change, one `IMMEDIATE` transaction each. A tenant that fails is marked
//! divergent and left for replay; the change stays committed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use cinch_core::{Change, ChangeId, CinchError, ConnectionContext, Result};
use cinch_storage::{metadata_store, ChangeLog, MetadataStore, ProjectLayout};

use crate::{apply, Engine};

/// Workers applying a change across tenants concurrently.
pub const FANOUT_PARALLELISM: usize = 4;

/// Cooperative cancellation flag observed between tenants.
///
/// Cancelling mid-fanout leaves the change committed and the remaining
/// tenants behind the log head; they are picked up by replay.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

impl Engine {
    /// Apply all pending changes to every tenant of the context's branch.
    ///
    /// Called after a change is committed to the log. Tenants are visited
    /// in arbitrary order by up to [`FANOUT_PARALLELISM`] workers. The
    /// first failure is surfaced as `TenantDivergent` after all workers
    /// finish; failed tenants are flagged in the metadata store.
    pub fn fan_out(&self, ctx: &ConnectionContext) -> Result<()> {
        self.fan_out_with(ctx, &CancelToken::new())
    }

    /// [`Engine::fan_out`] with an external cancellation token.
    pub fn fan_out_with(&self, ctx: &ConnectionContext, cancel: &CancelToken) -> Result<()> {
        let store = metadata_store(&ctx.project_root)?;
        let tenants = store.list_tenants(&ctx.database, &ctx.branch)?;
        if tenants.is_empty() {
            return Ok(());
        }

        let next = AtomicUsize::new(0);
        let failures: Mutex<Vec<(String, CinchError)>> = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..FANOUT_PARALLELISM.min(tenants.len()) {
                scope.spawn(|| loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(tenant) = tenants.get(idx) else {
                        break;
                    };
                    if let Err(e) = self.catch_up_tenant(ctx, tenant, &store) {
                        tracing::warn!(tenant = %tenant, error = %e, "fanout failed; marking divergent");
                        let _ = store.set_divergent(&ctx.database, &ctx.branch, tenant, true);
                        failures.lock().push((tenant.clone(), e));
                    }
                });
            }
        });

        let mut failures = failures.into_inner();
        match failures.pop() {
            None => Ok(()),
            Some((tenant, e)) => Err(CinchError::TenantDivergent {
                tenant,
                message: e.to_string(),
            }),
        }
    }

    /// Replay the ordered suffix of the change log past the tenant's
    /// `schema_version`. Also the catch-up path for newly created and
    /// previously divergent tenants.
    pub(crate) fn catch_up_tenant(
        &self,
        ctx: &ConnectionContext,
        tenant: &str,
        store: &MetadataStore,
    ) -> Result<()> {
        let layout = ProjectLayout::for_context(ctx);
        let log = ChangeLog::for_branch(&layout, &ctx.database, &ctx.branch);
        let changes = log.read()?;

        let current = store.get_schema_version(&ctx.database, &ctx.branch, tenant)?;
        let pending = pending_suffix(&changes, current);
        if pending.is_empty() {
            return Ok(());
        }

        for change in pending {
            let mut conn = self.borrow_tenant(ctx, tenant)?;
            apply::apply_change(&mut conn, change)?;
            drop(conn);
            store.set_schema_version(&ctx.database, &ctx.branch, tenant, change.id)?;
            log.mark_applied(change.id, tenant)?;
        }
        Ok(())
    }

    /// Recover a divergent tenant by replaying pending changes, then clear
    /// its divergent flag.
    pub fn replay_tenant(&self, ctx: &ConnectionContext, tenant: &str) -> Result<()> {
        let store = metadata_store(&ctx.project_root)?;
        if !store.tenant_exists(&ctx.database, &ctx.branch, tenant)? {
            return Err(CinchError::NotFound(format!(
                "tenant '{tenant}' on branch '{}/{}'",
                ctx.database, ctx.branch
            )));
        }
        self.catch_up_tenant(ctx, tenant, &store)?;
        store.set_divergent(&ctx.database, &ctx.branch, tenant, false)?;
        Ok(())
    }
}

/// Changes strictly after `current` in log order. A tenant whose version
/// is unknown (fresh file) replays the whole log.
fn pending_suffix(changes: &[Change], current: Option<ChangeId>) -> &[Change] {
    match current {
        None => changes,
        Some(version) => {
            match changes.iter().rposition(|c| c.id <= version) {
                Some(pos) => &changes[pos + 1..],
                None => changes,
            }
        }
    }
}
