//! Project configuration and initialization.
//!
//! A project is a directory owning one `.cinchdb/` tree: a `config.toml`,
//! the metadata store, and the `databases/` subtree. `init_project` seeds
//! the `main` database with a `main` branch and `main` tenant.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use cinch_core::{validate_name, CinchError, Result, MAIN_BRANCH, MAIN_TENANT};
use cinch_storage::{metadata_store, BranchMetadata, ChangeLog, ProjectLayout};

use crate::Engine;

/// Contents of `.cinchdb/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub active_database: String,
    pub active_branch: String,
    #[serde(default)]
    pub api_keys: BTreeMap<String, String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            active_database: "main".to_string(),
            active_branch: MAIN_BRANCH.to_string(),
            api_keys: BTreeMap::new(),
        }
    }
}

/// Loader/saver for a project's `config.toml`.
#[derive(Debug, Clone)]
pub struct Config {
    layout: ProjectLayout,
}

impl Config {
    pub fn new(project_root: impl AsRef<Path>) -> Self {
        Self {
            layout: ProjectLayout::new(project_root),
        }
    }

    /// Whether the project has been initialized.
    pub fn exists(&self) -> bool {
        self.layout.config_path().exists()
    }

    pub fn load(&self) -> Result<ProjectConfig> {
        let path = self.layout.config_path();
        if !path.exists() {
            return Err(CinchError::NotFound(format!(
                "project config at {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(&path)?;
        toml::from_str(&raw)
            .map_err(|e| CinchError::storage(format!("parse {}", path.display()), e))
    }

    pub fn save(&self, config: &ProjectConfig) -> Result<()> {
        let raw = toml::to_string_pretty(config)
            .map_err(|e| CinchError::storage("serialize project config", e))?;
        std::fs::write(self.layout.config_path(), raw)?;
        Ok(())
    }
}

impl Engine {
    /// Initialize a new project at `root`.
    ///
    /// Creates the `.cinchdb/` tree, the metadata store, and the `main`
    /// database with its `main` branch and `main` tenant. Fails with
    /// `AlreadyExists` if the project is already initialized.
    pub fn init_project(&self, root: impl AsRef<Path>) -> Result<ProjectConfig> {
        let root = root.as_ref();
        let config = Config::new(root);
        if config.exists() {
            return Err(CinchError::AlreadyExists(format!(
                "project at {}",
                root.display()
            )));
        }

        let layout = ProjectLayout::new(root);
        std::fs::create_dir_all(layout.databases_dir())?;

        let project_config = ProjectConfig::default();
        config.save(&project_config)?;

        // Opening the store creates metadata.db and its schema.
        metadata_store(root)?;

        self.init_database(root, &project_config.active_database)?;

        tracing::info!(root = %root.display(), "initialized project");
        Ok(project_config)
    }

    /// Create a database inside an existing project, with its `main`
    /// branch and `main` tenant.
    pub fn init_database(&self, root: impl AsRef<Path>, name: &str) -> Result<()> {
        let root = root.as_ref();
        let database = validate_name(name, "database")?;
        let layout = ProjectLayout::new(root);

        if layout.database_dir(&database).exists() {
            return Err(CinchError::AlreadyExists(format!("database '{database}'")));
        }

        std::fs::create_dir_all(layout.tenants_dir(&database, MAIN_BRANCH))?;

        ChangeLog::for_branch(&layout, &database, MAIN_BRANCH).init()?;
        BranchMetadata::new(None)
            .save(&layout.branch_metadata_path(&database, MAIN_BRANCH))?;

        let store = metadata_store(root)?;
        store.register_database(&database)?;
        store.register_branch(&database, MAIN_BRANCH, None)?;
        store.register_tenant(&database, MAIN_BRANCH, MAIN_TENANT)?;

        // Borrowing the connection creates the tenant file in WAL mode.
        let tenant_path = layout.tenant_path(&database, MAIN_BRANCH, MAIN_TENANT);
        drop(self.pool().borrow(&tenant_path, None)?);

        tracing::info!(%database, "initialized database");
        Ok(())
    }

    /// Delete a database and every branch under it.
    ///
    /// Refuses while any tenant connection of the database is borrowed.
    pub fn delete_database(&self, root: impl AsRef<Path>, name: &str) -> Result<()> {
        let root = root.as_ref();
        let database = validate_name(name, "database")?;
        let layout = ProjectLayout::new(root);

        let dir = layout.database_dir(&database);
        if !dir.exists() {
            return Err(CinchError::NotFound(format!("database '{database}'")));
        }
        cinch_storage::check_maintenance(root, &database, None)?;

        if self.pool().has_live_borrows(&dir) {
            return Err(CinchError::Concurrency(format!(
                "database '{database}' has tenant connections in use"
            )));
        }
        self.pool().evict_prefix(&dir)?;

        std::fs::remove_dir_all(&dir)?;
        metadata_store(root)?.drop_database(&database)?;

        tracing::info!(%database, "deleted database");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_project() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();

        let config = Config::new(dir.path());
        assert!(!config.exists());

        let project_config = engine.init_project(dir.path()).unwrap();
        assert_eq!(project_config.active_database, "main");
        assert_eq!(project_config.active_branch, "main");
        assert!(project_config.api_keys.is_empty());

        let layout = ProjectLayout::new(dir.path());
        assert!(config.exists());
        assert!(layout.metadata_db_path().exists());
        assert!(layout.branch_dir("main", "main").exists());
        assert!(layout.branch_metadata_path("main", "main").exists());
        assert!(layout.changes_path("main", "main").exists());
        assert!(layout.tenant_path("main", "main", "main").exists());

        engine.close_all();
    }

    #[test]
    fn test_init_project_already_exists() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();
        engine.init_project(dir.path()).unwrap();

        assert!(matches!(
            engine.init_project(dir.path()),
            Err(CinchError::AlreadyExists(_))
        ));
        engine.close_all();
    }

    #[test]
    fn test_config_round_trip() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();
        engine.init_project(dir.path()).unwrap();

        let config = Config::new(dir.path());
        let mut loaded = config.load().unwrap();
        loaded.active_database = "analytics".to_string();
        loaded.active_branch = "feature".to_string();
        config.save(&loaded).unwrap();

        let reloaded = config.load().unwrap();
        assert_eq!(reloaded.active_database, "analytics");
        assert_eq!(reloaded.active_branch, "feature");
        engine.close_all();
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());
        assert!(matches!(config.load(), Err(CinchError::NotFound(_))));
    }

    #[test]
    fn test_delete_database() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();
        engine.init_project(dir.path()).unwrap();
        engine.init_database(dir.path(), "analytics").unwrap();

        engine.delete_database(dir.path(), "analytics").unwrap();
        assert!(!ProjectLayout::new(dir.path())
            .database_dir("analytics")
            .exists());
        assert!(matches!(
            engine.delete_database(dir.path(), "analytics"),
            Err(CinchError::NotFound(_))
        ));
        engine.close_all();
    }

    #[test]
    fn test_init_database_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::new();
        engine.init_project(dir.path()).unwrap();

        assert!(matches!(
            engine.init_database(dir.path(), "my-db"),
            Err(CinchError::InvalidName(_))
        ));
        assert!(matches!(
            engine.init_database(dir.path(), "main"),
            Err(CinchError::AlreadyExists(_))
        ));
        engine.close_all();
    }
}
