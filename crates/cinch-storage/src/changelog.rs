//! Branch documents: the change log and branch metadata.
//!
//! `changes.json` is the append-only ordered list of schema changes for a
//! branch. Appends take an advisory file lock on the branch directory;
//! readers go lock-free and tolerate a change appearing mid-scan because
//! every write lands via temp-file-and-rename.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use cinch_core::{Change, ChangeId, CinchError, Result};

use crate::layout::ProjectLayout;

/// Format version written into `changes.json` and `metadata.json`.
pub const CHANGES_FORMAT_VERSION: u32 = 1;

/// Per-branch `metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub parent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u32,
}

impl BranchMetadata {
    pub fn new(parent: Option<String>) -> Self {
        Self {
            parent,
            created_at: Utc::now(),
            schema_version: CHANGES_FORMAT_VERSION,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChangeLogDoc {
    version: u32,
    changes: Vec<Change>,
}

impl ChangeLogDoc {
    fn empty() -> Self {
        Self {
            version: CHANGES_FORMAT_VERSION,
            changes: Vec::new(),
        }
    }
}

/// Append-only ordered change log of one branch.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl ChangeLog {
    pub fn for_branch(layout: &ProjectLayout, database: &str, branch: &str) -> Self {
        Self {
            path: layout.changes_path(database, branch),
            lock_path: layout.changes_lock_path(database, branch),
        }
    }

    /// Create an empty log file. Fails if one already exists.
    pub fn init(&self) -> Result<()> {
        if self.path.exists() {
            return Err(CinchError::AlreadyExists(format!(
                "change log at {}",
                self.path.display()
            )));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, &serde_json::to_string_pretty(&ChangeLogDoc::empty())?)
    }

    /// Read the full ordered list of changes. Lock-free.
    pub fn read(&self) -> Result<Vec<Change>> {
        if !self.path.exists() {
            return Err(CinchError::NotFound(format!(
                "change log at {}",
                self.path.display()
            )));
        }
        let raw = std::fs::read_to_string(&self.path)?;
        let doc: ChangeLogDoc = serde_json::from_str(&raw)?;
        Ok(doc.changes)
    }

    /// Id of the newest committed change, if any.
    pub fn head(&self) -> Result<Option<ChangeId>> {
        Ok(self.read()?.last().map(|c| c.id))
    }

    /// Commit a payload as a new change: the id is stamped under the
    /// branch lock so id order always matches log order, even when two
    /// writers contend.
    pub fn commit(&self, payload: cinch_core::ChangePayload) -> Result<Change> {
        let _lock = self.lock()?;
        let mut doc = self.read_doc()?;

        let change = Change::new(payload);
        if let Some(last) = doc.changes.last() {
            if change.id <= last.id {
                return Err(CinchError::Concurrency(format!(
                    "change id {} does not advance the log head {}",
                    change.id, last.id
                )));
            }
        }

        doc.changes.push(change.clone());
        self.write_doc(&doc)?;
        Ok(change)
    }

    /// Append an already-stamped change under the branch lock.
    ///
    /// Enforces append monotonicity: the new id must be strictly greater
    /// than the current head.
    pub fn append(&self, change: &Change) -> Result<()> {
        let _lock = self.lock()?;
        let mut doc = self.read_doc()?;

        if let Some(last) = doc.changes.last() {
            if change.id <= last.id {
                return Err(CinchError::Concurrency(format!(
                    "change id {} does not advance the log head {}",
                    change.id, last.id
                )));
            }
        }

        doc.changes.push(change.clone());
        self.write_doc(&doc)
    }

    /// Record that `tenant` has applied `change_id`.
    pub fn mark_applied(&self, change_id: ChangeId, tenant: &str) -> Result<()> {
        let _lock = self.lock()?;
        let mut doc = self.read_doc()?;

        let change = doc
            .changes
            .iter_mut()
            .find(|c| c.id == change_id)
            .ok_or_else(|| CinchError::NotFound(format!("change {change_id}")))?;
        change.applied_tenants.insert(tenant.to_string());

        self.write_doc(&doc)
    }

    /// Write a full snapshot of changes, e.g. when a new branch copies its
    /// parent's log. Fails if the log already exists.
    pub fn init_with(&self, changes: &[Change]) -> Result<()> {
        if self.path.exists() {
            return Err(CinchError::AlreadyExists(format!(
                "change log at {}",
                self.path.display()
            )));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = ChangeLogDoc {
            version: CHANGES_FORMAT_VERSION,
            changes: changes.to_vec(),
        };
        self.write_doc(&doc)
    }

    fn read_doc(&self) -> Result<ChangeLogDoc> {
        if !self.path.exists() {
            return Ok(ChangeLogDoc::empty());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn write_doc(&self, doc: &ChangeLogDoc) -> Result<()> {
        write_atomic(&self.path, &serde_json::to_string_pretty(doc)?)
    }

    fn lock(&self) -> Result<LogLock> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CinchError::Concurrency(format!("acquiring branch append lock: {e}")))?;
        Ok(LogLock { file })
    }
}

/// RAII guard for the advisory append lock.
struct LogLock {
    file: File,
}

impl Drop for LogLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
