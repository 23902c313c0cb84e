//! View operations.

use cinch_core::{
    sql::validate_view_sql, validate_name, Change, ChangePayload, CinchError, ConnectionContext,
    Result, MAIN_TENANT,
};
use cinch_storage::check_maintenance;

use crate::{schema, Engine};

impl Engine {
    /// Create a view over a read-only SELECT.
    pub fn create_view(
        &self,
        ctx: &ConnectionContext,
        name: &str,
        select_sql: &str,
    ) -> Result<Change> {
        let view = validate_name(name, "view")?;
        validate_view_sql(select_sql)?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            if schema::view_exists(&conn, &view)? || schema::table_exists(&conn, &view)? {
                return Err(CinchError::AlreadyExists(format!("view '{view}'")));
            }
        }

        self.commit_and_fan_out(
            ctx,
            ChangePayload::CreateView {
                view,
                select_sql: select_sql.trim().trim_end_matches(';').to_string(),
            },
        )
    }

    /// Drop a view.
    pub fn drop_view(&self, ctx: &ConnectionContext, name: &str) -> Result<Change> {
        let view = validate_name(name, "view")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            if !schema::view_exists(&conn, &view)? {
                return Err(CinchError::NotFound(format!("view '{view}'")));
            }
        }

        self.commit_and_fan_out(ctx, ChangePayload::DropView { view })
    }
}
