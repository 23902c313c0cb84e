//! Physical application of change records to a tenant database.
//!
//! Every change kind lowers to a fixed sequence of SQL statements, run in
//! one `IMMEDIATE` transaction per change so readers see the pre-change
//! schema until commit.

use rusqlite::{Connection, TransactionBehavior};

use cinch_core::{Change, ChangePayload, Column, Result};

/// System columns added to every table at creation.
const IMPLICIT_COLUMNS: &str =
    "\"id\" TEXT PRIMARY KEY, \"created_at\" TEXT NOT NULL DEFAULT (datetime('now')), \
     \"updated_at\" TEXT";

/// Lower a change payload to its SQL statements.
pub(crate) fn statements_for(payload: &ChangePayload) -> Vec<String> {
    match payload {
        ChangePayload::CreateTable { table, columns } => {
            let mut defs = vec![IMPLICIT_COLUMNS.to_string()];
            defs.extend(columns.iter().map(column_def));
            vec![format!(
                "CREATE TABLE \"{table}\" ({})",
                defs.join(", ")
            )]
        }
        ChangePayload::DropTable { table } => {
            vec![format!("DROP TABLE \"{table}\"")]
        }
        ChangePayload::AddColumn { table, column } => {
            vec![format!(
                "ALTER TABLE \"{table}\" ADD COLUMN {}",
                column_def(column)
            )]
        }
        ChangePayload::DropColumn { table, column } => {
            vec![format!("ALTER TABLE \"{table}\" DROP COLUMN \"{column}\"")]
        }
        ChangePayload::RenameColumn { table, old, new } => {
            vec![format!(
                "ALTER TABLE \"{table}\" RENAME COLUMN \"{old}\" TO \"{new}\""
            )]
        }
        ChangePayload::CreateView { view, select_sql } => {
            vec![format!("CREATE VIEW \"{view}\" AS {select_sql}")]
        }
        ChangePayload::DropView { view } => {
            vec![format!("DROP VIEW \"{view}\"")]
        }
    }
}

fn column_def(column: &Column) -> String {
    let mut def = format!("\"{}\" {}", column.name, column.col_type);
    if !column.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &column.default {
        def.push_str(&format!(" DEFAULT ({default})"));
    }
    def
}

/// Apply one change inside an `IMMEDIATE` transaction, rolling back on any
/// failure.
pub(crate) fn apply_change(conn: &mut Connection, change: &Change) -> Result<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    for sql in statements_for(&change.payload) {
        tx.execute_batch(&sql)?;
    }
    tx.commit()?;
    Ok(())
}
