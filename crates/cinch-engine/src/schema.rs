//! Schema introspection over a tenant connection.
//!
//! Read-only helpers shared by the table, column, and view managers and
//! exposed to the API layer. All introspection runs against the `main`
//! tenant, which by invariant carries the branch's applied schema.

use rusqlite::Connection;

use cinch_core::{ConnectionContext, Result, MAIN_TENANT};

use crate::Engine;

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableColumn {
    pub name: String,
    pub col_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

/// A table with its columns.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<TableColumn>,
}

/// A view with its defining SQL.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ViewInfo {
    pub name: String,
    pub select_sql: String,
}

pub(crate) fn list_tables(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

pub(crate) fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<TableColumn>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(TableColumn {
                name: row.get(0)?,
                col_type: row.get(1)?,
                nullable: row.get::<_, i64>(2)? == 0,
                default: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

pub(crate) fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c.name == column))
}

pub(crate) fn list_views(conn: &Connection) -> Result<Vec<ViewInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name",
    )?;
    let views = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

    Ok(views
        .into_iter()
        .map(|(name, sql)| ViewInfo {
            select_sql: select_body(&sql).to_string(),
            name,
        })
        .collect())
}

pub(crate) fn view_exists(conn: &Connection, view: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'view' AND name = ?1",
        [view],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Names of views whose SQL references `identifier` as a whole word.
///
/// A token scan over the stored view SQL; coarse but deterministic, and
/// exactly what the destructive-operation guards need.
pub(crate) fn views_referencing(conn: &Connection, identifier: &str) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name, sql FROM sqlite_master WHERE type = 'view' ORDER BY name")?;
    let views = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<(String, String)>, _>>()?;

    Ok(views
        .into_iter()
        .filter(|(_, sql)| {
            sql.split(|c: char| !c.is_alphanumeric() && c != '_')
                .any(|token| token == identifier)
        })
        .map(|(name, _)| name)
        .collect())
}

/// Strip `CREATE VIEW ... AS` from stored view SQL, leaving the SELECT.
fn select_body(sql: &str) -> &str {
    let upper = sql.to_ascii_uppercase();
    match upper.find(" AS ") {
        Some(pos) => sql[pos + 4..].trim(),
        None => sql,
    }
}

impl Engine {
    /// Tables of the context's branch.
    pub fn list_tables(&self, ctx: &ConnectionContext) -> Result<Vec<String>> {
        self.ensure_branch(ctx)?;
        let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
        list_tables(&conn)
    }

    /// A table with its full column list.
    pub fn get_table(&self, ctx: &ConnectionContext, table: &str) -> Result<TableInfo> {
        self.ensure_branch(ctx)?;
        let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
        if !table_exists(&conn, table)? {
            return Err(cinch_core::CinchError::NotFound(format!("table '{table}'")));
        }
        Ok(TableInfo {
            name: table.to_string(),
            columns: table_columns(&conn, table)?,
        })
    }

    /// Views of the context's branch.
    pub fn list_views(&self, ctx: &ConnectionContext) -> Result<Vec<ViewInfo>> {
        self.ensure_branch(ctx)?;
        let conn = self.borrow_tenant(ctx, MAIN_TENANT)?;
        list_views(&conn)
    }

    /// A single view with its defining SQL.
    pub fn get_view(&self, ctx: &ConnectionContext, view: &str) -> Result<ViewInfo> {
        self.list_views(ctx)?
            .into_iter()
            .find(|v| v.name == view)
            .ok_or_else(|| cinch_core::CinchError::NotFound(format!("view '{view}'")))
    }
}
