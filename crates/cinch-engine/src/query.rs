//! Query executor.
//!
//! Routes a validated read or write statement to the addressed tenant's
//! pooled connection. DDL never passes this door; schema mutations go
//! through the managers so they land in the change log.

use rusqlite::Statement;

use cinch_core::{
    sql::{validate_read_query, validate_write_statement},
    CinchError, ConnectionContext, Result, Row, Value,
};
use cinch_storage::check_maintenance;

use crate::Engine;

/// Positional or named parameters for a statement.
#[derive(Debug, Clone, Default)]
pub enum QueryParams {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl From<Vec<Value>> for QueryParams {
    fn from(values: Vec<Value>) -> Self {
        Self::Positional(values)
    }
}

impl From<Vec<(String, Value)>> for QueryParams {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        Self::Named(pairs)
    }
}

impl Engine {
    /// Execute a read statement, returning ordered rows of typed cells.
    pub fn execute(
        &self,
        ctx: &ConnectionContext,
        sql: &str,
        params: QueryParams,
    ) -> Result<Vec<Row>> {
        validate_read_query(sql)?;
        self.ensure_branch(ctx)?;

        let conn = self.borrow_context_tenant(ctx)?;
        let mut stmt = conn.prepare(sql)?;
        bind(&mut stmt, &params)?;

        let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let value: rusqlite::types::Value = row.get_ref(idx)?.into();
                values.push(Value::from(value));
            }
            out.push(Row {
                columns: columns.clone(),
                values,
            });
        }
        Ok(out)
    }

    /// Execute a write statement, returning the affected row count.
    ///
    /// Writes are gated on maintenance; reads are not.
    pub fn execute_write(
        &self,
        ctx: &ConnectionContext,
        sql: &str,
        params: QueryParams,
    ) -> Result<usize> {
        validate_write_statement(sql)?;
        check_maintenance(&ctx.project_root, &ctx.database, Some(&ctx.branch))?;
        self.ensure_branch(ctx)?;

        let conn = self.borrow_context_tenant(ctx)?;
        let mut stmt = conn.prepare(sql)?;
        bind(&mut stmt, &params)?;
        Ok(stmt.raw_execute()?)
    }
}

fn bind(stmt: &mut Statement<'_>, params: &QueryParams) -> Result<()> {
    match params {
        QueryParams::None => {
            if stmt.parameter_count() != 0 {
                return Err(CinchError::SqlValidation(format!(
                    "statement expects {} parameter(s), none given",
                    stmt.parameter_count()
                )));
            }
        }
        QueryParams::Positional(values) => {
            if stmt.parameter_count() != values.len() {
                return Err(CinchError::SqlValidation(format!(
                    "statement expects {} parameter(s), {} given",
                    stmt.parameter_count(),
                    values.len()
                )));
            }
            for (idx, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(idx + 1, value)?;
            }
        }
        QueryParams::Named(pairs) => {
            for (name, value) in pairs {
                let prefixed = if name.starts_with(':') || name.starts_with('@') || name.starts_with('$') {
                    name.clone()
                } else {
                    format!(":{name}")
                };
                let idx = stmt.parameter_index(&prefixed)?.ok_or_else(|| {
                    CinchError::SqlValidation(format!("unknown parameter '{name}'"))
                })?;
                stmt.raw_bind_parameter(idx, value)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinch_core::{Column, ColumnType};
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
                vec![
                    Column::new("email", ColumnType::Text, false),
                    Column::new("age", ColumnType::Integer, true),
                ],
            )
            .unwrap();
        (dir, engine, ctx)
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, engine, ctx) = setup();
        let affected = engine
            .execute_write(
                &ctx,
                "INSERT INTO users (id, email, age) VALUES (?1, ?2, ?3)",
                vec![
                    Value::from("u1"),
                    Value::from("a@b"),
                    Value::Integer(30),
                ]
                .into(),
            )
            .unwrap();
        assert_eq!(affected, 1);

        let rows = engine
            .execute(
                &ctx,
                "SELECT email, age FROM users WHERE id = :id",
                vec![("id".to_string(), Value::from("u1"))].into(),
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("email").unwrap().as_text(), Some("a@b"));
        assert_eq!(rows[0].get("age").unwrap().as_integer(), Some(30));
        engine.close_all();
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let (_dir, engine, ctx) = setup();
        assert!(matches!(
            engine.execute(&ctx, "DELETE FROM users", QueryParams::None),
            Err(CinchError::SqlValidation(_))
        ));
        assert!(matches!(
            engine.execute_write(&ctx, "SELECT 1", QueryParams::None),
            Err(CinchError::SqlValidation(_))
        ));
        assert!(matches!(
            engine.execute_write(&ctx, "DROP TABLE users", QueryParams::None),
            Err(CinchError::SqlValidation(_))
        ));
        engine.close_all();
    }

    #[test]
    fn test_parameter_count_mismatch() {
        let (_dir, engine, ctx) = setup();
        assert!(matches!(
            engine.execute(
                &ctx,
                "SELECT * FROM users WHERE id = ?1",
                QueryParams::None
            ),
            Err(CinchError::SqlValidation(_))
        ));
        engine.close_all();
    }

    #[test]
    fn test_tenant_isolation() {
        let (_dir, engine, ctx) = setup();
        engine.create_tenant(&ctx, "t1").unwrap();

        engine
            .execute_write(
                &ctx,
                "INSERT INTO users (id, email) VALUES ('u1', 'a@b')",
                QueryParams::None,
            )
            .unwrap();

        let t1 = ctx.clone().with_tenant("t1");
        let rows = engine
            .execute(&t1, "SELECT COUNT(*) AS n FROM users", QueryParams::None)
            .unwrap();
        assert_eq!(rows[0].get("n").unwrap().as_integer(), Some(0));
        engine.close_all();
    }

    #[test]
    fn test_malformed_tenant_rejected_before_path_resolution() {
        let (_dir, engine, ctx) = setup();
        // Traversal-shaped tenant names must fail name validation, never
        // resolve to a file outside the branch's tenants directory.
        for bad in ["../../other/tenants/main", "a/b", "..", "main.db"] {
            let bad_ctx = ctx.clone().with_tenant(bad);
            assert!(
                matches!(
                    engine.execute(&bad_ctx, "SELECT 1", QueryParams::None),
                    Err(CinchError::InvalidName(_))
                ),
                "{bad}"
            );
            assert!(
                matches!(
                    engine.execute_write(&bad_ctx, "DELETE FROM users", QueryParams::None),
                    Err(CinchError::InvalidName(_))
                ),
                "{bad}"
            );
        }
        engine.close_all();
    }

    #[test]
    fn test_missing_tenant_is_not_found() {
        let (_dir, engine, ctx) = setup();
        let ghost = ctx.clone().with_tenant("ghost");
        assert!(matches!(
            engine.execute(&ghost, "SELECT 1", QueryParams::None),
            Err(CinchError::NotFound(_))
        ));
        engine.close_all();
    }
}
