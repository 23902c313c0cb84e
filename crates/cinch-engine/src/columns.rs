//! Column operations.

use cinch_core::{
    validate_name, validation::is_system_column, Change, ChangePayload, CinchError, Column,
    ConnectionContext, Result, MAIN_TENANT,
};
use cinch_storage::check_maintenance;

use crate::{schema, Engine};

impl Engine {
    /// Append a column to a table. Non-nullable columns must carry a
    /// default, because every existing row needs a value.
    pub fn add_column(
        &self,
        ctx: &ConnectionContext,
        table: &str,
        column: Column,
    ) -> Result<Change> {
        let table = validate_name(table, "table")?;
        let column_name = validate_name(&column.name, "column")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        if is_system_column(&column_name) {
            return Err(CinchError::InvalidName(format!(
                "column '{column_name}' is reserved"
            )));
        }
        if !column.nullable && column.default.is_none() {
            return Err(CinchError::SchemaConflict(format!(
                "non-nullable column '{column_name}' requires a default"
            )));
        }

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            if !schema::table_exists(&conn, &table)? {
                return Err(CinchError::NotFound(format!("table '{table}'")));
            }
            if schema::column_exists(&conn, &table, &column_name)? {
                return Err(CinchError::AlreadyExists(format!(
                    "column '{column_name}' on table '{table}'"
                )));
            }
        }

        self.commit_and_fan_out(
            ctx,
            ChangePayload::AddColumn {
                table,
                column: Column {
                    name: column_name,
                    ..column
                },
            },
        )
    }

    /// Drop a column. Refuses for system columns and for columns any view
    /// references.
    pub fn drop_column(&self, ctx: &ConnectionContext, table: &str, column: &str) -> Result<Change> {
        let table = validate_name(table, "table")?;
        let column = validate_name(column, "column")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        if is_system_column(&column) {
            return Err(CinchError::SchemaConflict(format!(
                "cannot drop system column '{column}'"
            )));
        }

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            if !schema::table_exists(&conn, &table)? {
                return Err(CinchError::NotFound(format!("table '{table}'")));
            }
            if !schema::column_exists(&conn, &table, &column)? {
                return Err(CinchError::NotFound(format!(
                    "column '{column}' on table '{table}'"
                )));
            }
            let dependents = schema::views_referencing(&conn, &column)?;
            if !dependents.is_empty() {
                return Err(CinchError::SchemaConflict(format!(
                    "cannot drop '{table}.{column}': referenced by view(s) {}",
                    dependents.join(", ")
                )));
            }
        }

        self.commit_and_fan_out(ctx, ChangePayload::DropColumn { table, column })
    }

    /// Rename a column.
    pub fn rename_column(
        &self,
        ctx: &ConnectionContext,
        table: &str,
        old: &str,
        new: &str,
    ) -> Result<Change> {
        let table = validate_name(table, "table")?;
        let old = validate_name(old, "column")?;
        let new = validate_name(new, "column")?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        if is_system_column(&old) || is_system_column(&new) {
            return Err(CinchError::SchemaConflict(
                "system columns cannot be renamed".to_string(),
            ));
        }

        {
            let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
            if !schema::table_exists(&conn, &table)? {
                return Err(CinchError::NotFound(format!("table '{table}'")));
            }
            if !schema::column_exists(&conn, &table, &old)? {
                return Err(CinchError::NotFound(format!(
                    "column '{old}' on table '{table}'"
                )));
            }
            if schema::column_exists(&conn, &table, &new)? {
                return Err(CinchError::AlreadyExists(format!(
                    "column '{new}' on table '{table}'"
                )));
            }
        }

        self.commit_and_fan_out(ctx, ChangePayload::RenameColumn { table, old, new })
    }

    /// Columns of a table, system columns included.
    pub fn list_columns(&self, ctx: &ConnectionContext, table: &str) -> Result<Vec<schema::TableColumn>> {
        Ok(self.get_table(ctx, table)?.columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinch_core::ColumnType;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Engine, ConnectionContext) {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();
        engine.init_project(dir.path()).unwrap();
        let ctx = ConnectionContext::new(dir.path(), "main", "main");
        engine
            .create_table(
                &ctx,
                "users",
                vec![Column::new("email", ColumnType::Text, false)],
            )
            .unwrap();
        (dir, engine, ctx)
    }

    #[test]
    fn test_add_column() {
        let (_dir, engine, ctx) = setup();
        engine
            .add_column(&ctx, "users", Column::new("age", ColumnType::Integer, true))
            .unwrap();
        let columns = engine.list_columns(&ctx, "users").unwrap();
        assert_eq!(columns.last().unwrap().name, "age");
        engine.close_all();
    }

    #[test]
    fn test_add_column_requires_default_for_non_nullable() {
        let (_dir, engine, ctx) = setup();
        assert!(matches!(
            engine.add_column(&ctx, "users", Column::new("n", ColumnType::Integer, false)),
            Err(CinchError::SchemaConflict(_))
        ));
        engine
            .add_column(
                &ctx,
                "users",
                Column::new("n", ColumnType::Integer, false).with_default("0"),
            )
            .unwrap();
        engine.close_all();
    }

    #[test]
    fn test_drop_column_guards() {
        let (_dir, engine, ctx) = setup();

        for system in ["id", "created_at", "updated_at"] {
            assert!(matches!(
                engine.drop_column(&ctx, "users", system),
                Err(CinchError::SchemaConflict(_))
            ));
        }

        engine
            .create_view(&ctx, "emails", "SELECT email FROM users")
            .unwrap();
        assert!(matches!(
            engine.drop_column(&ctx, "users", "email"),
            Err(CinchError::SchemaConflict(_))
        ));
        engine.drop_view(&ctx, "emails").unwrap();
        engine.drop_column(&ctx, "users", "email").unwrap();

        assert!(matches!(
            engine.drop_column(&ctx, "users", "email"),
            Err(CinchError::NotFound(_))
        ));
        engine.close_all();
    }

    #[test]
    fn test_rename_column() {
        let (_dir, engine, ctx) = setup();
        engine.rename_column(&ctx, "users", "email", "mail").unwrap();

        let columns = engine.list_columns(&ctx, "users").unwrap();
        assert!(columns.iter().any(|c| c.name == "mail"));
        assert!(!columns.iter().any(|c| c.name == "email"));

        assert!(matches!(
            engine.rename_column(&ctx, "users", "missing", "x"),
            Err(CinchError::NotFound(_))
        ));
        assert!(matches!(
            engine.rename_column(&ctx, "users", "mail", "id"),
            Err(CinchError::SchemaConflict(_))
        ));
        engine.close_all();
    }
}
