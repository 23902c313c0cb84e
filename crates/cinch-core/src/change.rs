//! Schema change records.
//!
//! A [`Change`] is an append-only record in a branch's change log. Changes
//! are never mutated or removed once committed; the `applied_tenants` set
//! tracks fanout progress.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ChangeId, Column};

/// Kind-specific payload of a schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ChangePayload {
    CreateTable {
        table: String,
        columns: Vec<Column>,
    },
    DropTable {
        table: String,
    },
    AddColumn {
        table: String,
        column: Column,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        old: String,
        new: String,
    },
    CreateView {
        view: String,
        select_sql: String,
    },
    DropView {
        view: String,
    },
}

impl ChangePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::DropTable { .. } => "drop_table",
            Self::AddColumn { .. } => "add_column",
            Self::DropColumn { .. } => "drop_column",
            Self::RenameColumn { .. } => "rename_column",
            Self::CreateView { .. } => "create_view",
            Self::DropView { .. } => "drop_view",
        }
    }

    /// The table or view this change targets.
    pub fn target(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::DropTable { table }
            | Self::AddColumn { table, .. }
            | Self::DropColumn { table, .. }
            | Self::RenameColumn { table, .. } => table,
            Self::CreateView { view, .. } | Self::DropView { view } => view,
        }
    }
}

/// A committed schema change in a branch's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    #[serde(flatten)]
    pub payload: ChangePayload,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub applied_tenants: BTreeSet<String>,
}

impl Change {
    pub fn new(payload: ChangePayload) -> Self {
        Self {
            id: ChangeId::generate(),
            payload,
            created_at: Utc::now(),
            applied_tenants: BTreeSet::new(),
        }
    }

    /// A copy of this change with a fresh id and empty application state,
    /// used when a merge re-appends source changes onto a target branch.
    pub fn restamped(&self) -> Self {
        Self::new(self.payload.clone())
    }

    /// Whether two changes describe the same mutation, ignoring identity
    /// and application state. Merge prefix detection compares content so a
    /// re-stamped change still matches its origin.
    pub fn same_content(&self, other: &Change) -> bool {
        self.payload == other.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ColumnType;

    #[test]
    fn test_serde_shape() {
        let change = Change::new(ChangePayload::AddColumn {
            table: "users".into(),
            column: Column::new("age", ColumnType::Integer, true),
        });
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"], "add_column");
        assert_eq!(json["payload"]["table"], "users");
        assert_eq!(json["payload"]["column"]["type"], "INTEGER");
        assert!(json["applied_tenants"].as_array().unwrap().is_empty());

        let back: Change = serde_json::from_value(json).unwrap();
        assert!(back.same_content(&change));
        assert_eq!(back.id, change.id);
    }

    #[test]
    fn test_restamp_preserves_content() {
        let change = Change::new(ChangePayload::DropView {
            view: "active_users".into(),
        });
        let copy = change.restamped();
        assert!(copy.same_content(&change));
        assert_ne!(copy.id, change.id);
        assert!(copy.id > change.id);
    }
}
