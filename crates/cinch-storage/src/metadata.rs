//! Project metadata store.
//!
//! A dedicated SQLite file per project (`.cinchdb/metadata.db`) recording
//! databases, branches, tenants, and maintenance state. The store is
//! authoritative for maintenance decisions; every operation is a single
//! statement and therefore individually atomic.
//!
//! Each project gets one store with a capacity-1 connection behind a
//! mutex; stores are handed out from a process-wide registry so that all
//! components of a process share the same handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lazy_static::lazy_static;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use cinch_core::{ChangeId, CinchError, Result};

use crate::layout::ProjectLayout;

lazy_static! {
    static ref METADATA_STORES: DashMap<PathBuf, Arc<MetadataStore>> = DashMap::new();
}

/// Scope of a maintenance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceScope {
    Database,
    Branch,
}

impl MaintenanceScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "db",
            Self::Branch => "branch",
        }
    }
}

/// A maintenance record as stored in the metadata store.
#[derive(Debug, Clone)]
pub struct MaintenanceInfo {
    pub scope: String,
    pub key: String,
    pub reason: String,
    pub started_at: DateTime<Utc>,
}

/// Get (or open) the metadata store for a project.
///
/// Stores are cached process-wide; repeated calls for the same root return
/// the same instance.
pub fn metadata_store(project_root: &Path) -> Result<Arc<MetadataStore>> {
    if let Some(store) = METADATA_STORES.get(project_root) {
        return Ok(store.clone());
    }
    let store = Arc::new(MetadataStore::open(project_root)?);
    METADATA_STORES.insert(project_root.to_path_buf(), store.clone());
    Ok(store)
}

/// Close every cached metadata store. Intended for test teardown and
/// process shutdown.
pub fn close_all_metadata() {
    METADATA_STORES.clear();
}

/// SQLite-backed metadata store for one project.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open the store for a project root, creating the schema if needed.
    pub fn open(project_root: &Path) -> Result<Self> {
        let path = ProjectLayout::new(project_root).metadata_db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)
            .map_err(|e| CinchError::storage(format!("open metadata store {}", path.display()), e))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA foreign_keys = ON;",
        )?;
        conn.busy_timeout(crate::pool::BUSY_TIMEOUT)?;
        init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // -- databases -----------------------------------------------------

    pub fn register_database(&self, database: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO databases (name, created_at) VALUES (?1, ?2)",
            params![database, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn drop_database(&self, database: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM databases WHERE name = ?1", [database])?;
        conn.execute("DELETE FROM branches WHERE database = ?1", [database])?;
        conn.execute("DELETE FROM tenants WHERE database = ?1", [database])?;
        Ok(())
    }

    pub fn database_exists(&self, database: &str) -> Result<bool> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM databases WHERE name = ?1",
            [database],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_databases(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM databases ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    // -- branches ------------------------------------------------------

    pub fn register_branch(&self, database: &str, branch: &str, parent: Option<&str>) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO branches (database, name, parent, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![database, branch, parent, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn drop_branch(&self, database: &str, branch: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM branches WHERE database = ?1 AND name = ?2",
            params![database, branch],
        )?;
        conn.execute(
            "DELETE FROM tenants WHERE database = ?1 AND branch = ?2",
            params![database, branch],
        )?;
        Ok(())
    }

    pub fn branch_exists(&self, database: &str, branch: &str) -> Result<bool> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM branches WHERE database = ?1 AND name = ?2",
            params![database, branch],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_branches(&self, database: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT name FROM branches WHERE database = ?1 ORDER BY name")?;
        let names = stmt
            .query_map([database], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    // -- tenants -------------------------------------------------------

    pub fn register_tenant(&self, database: &str, branch: &str, tenant: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO tenants (database, branch, name, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![database, branch, tenant, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn drop_tenant(&self, database: &str, branch: &str, tenant: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM tenants WHERE database = ?1 AND branch = ?2 AND name = ?3",
            params![database, branch, tenant],
        )?;
        Ok(())
    }

    pub fn tenant_exists(&self, database: &str, branch: &str, tenant: &str) -> Result<bool> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM tenants WHERE database = ?1 AND branch = ?2 AND name = ?3",
            params![database, branch, tenant],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn list_tenants(&self, database: &str, branch: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM tenants WHERE database = ?1 AND branch = ?2 ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![database, branch], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    // -- schema versions -----------------------------------------------

    pub fn get_schema_version(
        &self,
        database: &str,
        branch: &str,
        tenant: &str,
    ) -> Result<Option<ChangeId>> {
        let version: Option<Option<String>> = self
            .conn
            .lock()
            .query_row(
                "SELECT schema_version FROM tenants \
                 WHERE database = ?1 AND branch = ?2 AND name = ?3",
                params![database, branch, tenant],
                |row| row.get(0),
            )
            .optional()?;

        match version.flatten() {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    pub fn set_schema_version(
        &self,
        database: &str,
        branch: &str,
        tenant: &str,
        version: ChangeId,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE tenants SET schema_version = ?4 \
             WHERE database = ?1 AND branch = ?2 AND name = ?3",
            params![database, branch, tenant, version.to_string()],
        )?;
        Ok(())
    }

    pub fn set_divergent(
        &self,
        database: &str,
        branch: &str,
        tenant: &str,
        divergent: bool,
    ) -> Result<()> {
        self.conn.lock().execute(
            "UPDATE tenants SET divergent = ?4 \
             WHERE database = ?1 AND branch = ?2 AND name = ?3",
            params![database, branch, tenant, divergent as i64],
        )?;
        Ok(())
    }

    pub fn is_divergent(&self, database: &str, branch: &str, tenant: &str) -> Result<bool> {
        let divergent: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT divergent FROM tenants \
                 WHERE database = ?1 AND branch = ?2 AND name = ?3",
                params![database, branch, tenant],
                |row| row.get(0),
            )
            .optional()?;
        Ok(divergent.unwrap_or(0) != 0)
    }

    // -- maintenance ---------------------------------------------------

    /// Enter maintenance for a scope/key. Idempotent: a second call with
    /// the same key leaves exactly one record.
    pub fn enter_maintenance(
        &self,
        scope: MaintenanceScope,
        key: &str,
        reason: &str,
    ) -> Result<()> {
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO maintenance (scope, key, reason, started_at) \
             VALUES (?1, ?2, ?3, ?4)",
            params![scope.as_str(), key, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Exit maintenance. Safe to call when no record exists.
    pub fn exit_maintenance(&self, scope: MaintenanceScope, key: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM maintenance WHERE scope = ?1 AND key = ?2",
            params![scope.as_str(), key],
        )?;
        Ok(())
    }

    /// Whether a database (or, if given, a branch of it) is in maintenance.
    ///
    /// Branch checks also honor database-level maintenance.
    pub fn is_in_maintenance(&self, database: &str, branch: Option<&str>) -> Result<bool> {
        if self.maintenance_record(MaintenanceScope::Database, database)?.is_some() {
            return Ok(true);
        }
        if let Some(branch) = branch {
            let key = branch_key(database, branch);
            if self.maintenance_record(MaintenanceScope::Branch, &key)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The active maintenance record for a database or branch, if any.
    /// Database-level records shadow branch-level ones.
    pub fn get_maintenance_info(
        &self,
        database: &str,
        branch: Option<&str>,
    ) -> Result<Option<MaintenanceInfo>> {
        if let Some(info) = self.maintenance_record(MaintenanceScope::Database, database)? {
            return Ok(Some(info));
        }
        if let Some(branch) = branch {
            let key = branch_key(database, branch);
            return self.maintenance_record(MaintenanceScope::Branch, &key);
        }
        Ok(None)
    }

    fn maintenance_record(
        &self,
        scope: MaintenanceScope,
        key: &str,
    ) -> Result<Option<MaintenanceInfo>> {
        let record = self
            .conn
            .lock()
            .query_row(
                "SELECT scope, key, reason, started_at FROM maintenance \
                 WHERE scope = ?1 AND key = ?2",
                params![scope.as_str(), key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        Ok(record.map(|(scope, key, reason, started_at)| MaintenanceInfo {
            scope,
            key,
            reason,
            started_at: started_at
                .parse()
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Count of maintenance records for a scope/key; used by tests to
    /// assert idempotence.
    pub fn maintenance_record_count(&self, scope: MaintenanceScope, key: &str) -> Result<i64> {
        let count: i64 = self.conn.lock().query_row(
            "SELECT COUNT(*) FROM maintenance WHERE scope = ?1 AND key = ?2",
            params![scope.as_str(), key],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Maintenance key for a branch scope.
pub fn branch_key(database: &str, branch: &str) -> String {
    format!("{database}/{branch}")
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS databases (
          name TEXT PRIMARY KEY,
          created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS branches (
          database TEXT NOT NULL,
          name TEXT NOT NULL,
          parent TEXT,
          created_at TEXT NOT NULL,
          PRIMARY KEY (database, name)
        );

        CREATE TABLE IF NOT EXISTS tenants (
          database TEXT NOT NULL,
          branch TEXT NOT NULL,
          name TEXT NOT NULL,
          schema_version TEXT,
          divergent INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL,
          PRIMARY KEY (database, branch, name)
        );

        CREATE INDEX IF NOT EXISTS idx_tenants_branch ON tenants(database, branch);

        CREATE TABLE IF NOT EXISTS maintenance (
          scope TEXT NOT NULL CHECK (scope IN ('db', 'branch')),
          key TEXT NOT NULL,
          reason TEXT NOT NULL,
          started_at TEXT NOT NULL,
          PRIMARY KEY (scope, key)
        );
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, MetadataStore) {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_tenant_registry() {
        let (_dir, store) = store();
        store.register_database("main").unwrap();
        store.register_branch("main", "main", None).unwrap();
        store.register_tenant("main", "main", "main").unwrap();
        store.register_tenant("main", "main", "t1").unwrap();

        assert_eq!(store.list_tenants("main", "main").unwrap(), vec!["main", "t1"]);
        assert!(store.tenant_exists("main", "main", "t1").unwrap());

        store.drop_tenant("main", "main", "t1").unwrap();
        assert_eq!(store.list_tenants("main", "main").unwrap(), vec!["main"]);
    }

    #[test]
    fn test_schema_versions() {
        let (_dir, store) = store();
        store.register_tenant("main", "main", "main").unwrap();

        assert!(store.get_schema_version("main", "main", "main").unwrap().is_none());

        let id = ChangeId::generate();
        store.set_schema_version("main", "main", "main", id).unwrap();
        assert_eq!(store.get_schema_version("main", "main", "main").unwrap(), Some(id));
    }

    #[test]
    fn test_divergent_flag() {
        let (_dir, store) = store();
        store.register_tenant("main", "main", "t1").unwrap();
        assert!(!store.is_divergent("main", "main", "t1").unwrap());

        store.set_divergent("main", "main", "t1", true).unwrap();
        assert!(store.is_divergent("main", "main", "t1").unwrap());

        store.set_divergent("main", "main", "t1", false).unwrap();
        assert!(!store.is_divergent("main", "main", "t1").unwrap());
    }

    #[test]
    fn test_maintenance_idempotent() {
        let (_dir, store) = store();

        store
            .enter_maintenance(MaintenanceScope::Database, "main", "upgrading")
            .unwrap();
        store
            .enter_maintenance(MaintenanceScope::Database, "main", "upgrading again")
            .unwrap();
        assert_eq!(
            store
                .maintenance_record_count(MaintenanceScope::Database, "main")
                .unwrap(),
            1
        );

        let info = store.get_maintenance_info("main", None).unwrap().unwrap();
        assert_eq!(info.reason, "upgrading");

        store.exit_maintenance(MaintenanceScope::Database, "main").unwrap();
        store.exit_maintenance(MaintenanceScope::Database, "main").unwrap();
        assert!(!store.is_in_maintenance("main", None).unwrap());
    }

    #[test]
    fn test_branch_maintenance_scoping() {
        let (_dir, store) = store();
        let key = branch_key("main", "feature");
        store
            .enter_maintenance(MaintenanceScope::Branch, &key, "branch copy in progress")
            .unwrap();

        assert!(!store.is_in_maintenance("main", None).unwrap());
        assert!(store.is_in_maintenance("main", Some("feature")).unwrap());
        assert!(!store.is_in_maintenance("main", Some("other")).unwrap());

        // Database-level maintenance covers every branch.
        store
            .enter_maintenance(MaintenanceScope::Database, "main", "full stop")
            .unwrap();
        assert!(store.is_in_maintenance("main", Some("other")).unwrap());
    }

    #[test]
    fn test_registry_returns_shared_instance() {
        let dir = TempDir::new().unwrap();
        let a = metadata_store(dir.path()).unwrap();
        let b = metadata_store(dir.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        close_all_metadata();
    }
}
