//! Table operations.
//!
//! Two-phase: validate and plan against the `main` tenant's schema, then
//! commit the change to the branch log and fan out to every tenant.

use cinch_core::{
    validate_name, validation::is_system_column, Change, ChangePayload, CinchError, Column,
    ConnectionContext, Result, MAIN_TENANT,
};
use cinch_storage::{check_maintenance, ChangeLog, ProjectLayout};

use crate::{schema, Engine};

impl Engine {
    /// Create a table with the given user columns.
    ///
    /// The implicit `id`, `created_at`, and `updated_at` columns are added
    /// by the engine; declaring them is an error.
    pub fn create_table(
        &self,
        ctx: &ConnectionContext,
        name: &str,
        columns: Vec<Column>,
    ) -> Result<Change> {
        let table = validate_name(name, "table")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        let mut validated = Vec::with_capacity(columns.len());
        for column in columns {
            let column_name = validate_name(&column.name, "column")?;
            if is_system_column(&column_name) {
                return Err(CinchError::InvalidName(format!(
                    "column '{column_name}' is reserved; it is added automatically"
                )));
            }
            if validated.iter().any(|c: &Column| c.name == column_name) {
                return Err(CinchError::AlreadyExists(format!(
                    "column '{column_name}' declared twice"
                )));
            }
            validated.push(Column {
                name: column_name,
                ..column
            });
        }

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            if schema::table_exists(&conn, &table)? || schema::view_exists(&conn, &table)? {
                return Err(CinchError::AlreadyExists(format!("table '{table}'")));
            }
        }

        self.commit_and_fan_out(
            ctx,
            ChangePayload::CreateTable {
                table,
                columns: validated,
            },
        )
    }

    /// Drop a table.
    ///
    /// Refuses to drop the last table of the branch, and refuses while any
    /// view references the table.
    pub fn drop_table(&self, ctx: &ConnectionContext, name: &str) -> Result<Change> {
        let table = validate_name(name, "table")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            let tables = schema::list_tables(&conn)?;
            if !tables.contains(&table) {
                return Err(CinchError::NotFound(format!("table '{table}'")));
            }
            if tables.len() == 1 {
                return Err(CinchError::SchemaConflict(format!(
                    "cannot drop '{table}': it is the last table on branch '{}/{}'",
                    ctx.database, ctx.branch
                )));
            }
            let dependents = schema::views_referencing(&conn, &table)?;
            if !dependents.is_empty() {
                return Err(CinchError::SchemaConflict(format!(
                    "cannot drop '{table}': referenced by view(s) {}",
                    dependents.join(", ")
                )));
            }
        }

        self.commit_and_fan_out(ctx, ChangePayload::DropTable { table })
    }

    /// Commit a validated payload to the branch log, then fan out.
    ///
    /// Fanout failure leaves the change committed and the affected tenant
    /// divergent; the error is surfaced to the caller.
    pub(crate) fn commit_and_fan_out(
        &self,
        ctx: &ConnectionContext,
        payload: ChangePayload,
    ) -> Result<Change> {
        let layout = ProjectLayout::for_context(ctx);
        let log = ChangeLog::for_branch(&layout, &ctx.database, &ctx.branch);
        let change = log.commit(payload)?;
        tracing::debug!(id = %change.id, kind = change.payload.kind(), "committed change");
        self.fan_out(ctx)?;
        Ok(change)
    }
}
