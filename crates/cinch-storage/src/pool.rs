//! Bounded keyed cache of SQLite connections.
//!
//! The pool is the only owner of tenant file handles. Entries are keyed by
//! tenant path plus a fingerprint of the encryption keying material, cached
//! LRU with a default capacity of 50, and handed out one exclusive borrow
//! at a time. Eviction of a borrowed entry is delayed until the borrow is
//! released.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};
use rusqlite::Connection;

use cinch_core::{CinchError, Result};

/// Default maximum number of cached connections per pool.
pub const DEFAULT_POOL_CAPACITY: usize = 50;

/// SQLite busy timeout applied to every pooled connection.
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Opaque provider of per-tenant encryption keying material.
///
/// The key lifecycle is owned elsewhere; the pool only fingerprints the
/// material into its cache key and applies it on open.
pub trait KeyProvider: Send + Sync {
    fn get_key(&self, database: &str, branch: &str, tenant: &str) -> Option<Vec<u8>>;
}

type PoolKey = (PathBuf, u64);
type Entry = Arc<Mutex<Connection>>;

/// An exclusive borrow of a pooled connection.
///
/// Holds the entry's lock for its lifetime; dropping the guard releases the
/// connection back to the cache.
pub struct PooledConnection {
    guard: ArcMutexGuard<RawMutex, Connection>,
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.guard
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.guard
    }
}

/// LRU cache of live SQLite connections, keyed by file path and encryption
/// key fingerprint.
pub struct ConnectionPool {
    capacity: usize,
    inner: Mutex<LruCache<PoolKey, Entry>>,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "pool capacity must be > 0");
        Self {
            capacity,
            inner: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of connections currently held open (cached or borrowed).
    pub fn open_connections(&self) -> usize {
        self.inner.lock().len()
    }

    /// Borrow the connection for `path`, opening it on a cold key.
    ///
    /// Opens happen under the pool lock, so two concurrent borrows of a
    /// cold key open exactly one connection. The returned guard is an
    /// exclusive borrow; a second borrow of the same key blocks until the
    /// first is released.
    pub fn borrow(&self, path: &Path, encryption_key: Option<&[u8]>) -> Result<PooledConnection> {
        let key = (path.to_path_buf(), fingerprint(encryption_key));

        let entry: Entry = {
            let mut inner = self.inner.lock();
            match inner.get(&key) {
                Some(entry) => entry.clone(),
                None => {
                    let conn = open_sqlite(path, encryption_key)?;
                    let entry = Arc::new(Mutex::new(conn));
                    inner.push(key, entry.clone());
                    Self::evict_over_capacity(&mut inner, self.capacity);
                    entry
                }
            }
        };

        Ok(PooledConnection {
            guard: entry.lock_arc(),
        })
    }

    /// Whether any connection under `prefix` is currently borrowed.
    pub fn has_live_borrows(&self, prefix: &Path) -> bool {
        self.inner
            .lock()
            .iter()
            .any(|((path, _), entry)| path.starts_with(prefix) && Arc::strong_count(entry) > 1)
    }

    /// Drop all cached connections under `prefix`.
    ///
    /// Fails with a concurrency error if any of them is borrowed.
    pub fn evict_prefix(&self, prefix: &Path) -> Result<()> {
        let mut inner = self.inner.lock();

        let keys: Vec<PoolKey> = inner
            .iter()
            .filter(|((path, _), _)| path.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &keys {
            if let Some(entry) = inner.peek(key) {
                if Arc::strong_count(entry) > 1 {
                    return Err(CinchError::Concurrency(format!(
                        "connection for {} is borrowed",
                        key.0.display()
                    )));
                }
            }
        }
        for key in keys {
            inner.pop(&key);
        }
        Ok(())
    }

    /// Close every cached connection. Borrowed entries are detached from
    /// the cache and close when their borrow is released.
    pub fn close_all(&self) {
        self.inner.lock().clear();
    }

    fn evict_over_capacity(inner: &mut LruCache<PoolKey, Entry>, capacity: usize) {
        let mut borrowed = Vec::new();
        while inner.len() > capacity {
            let Some((key, entry)) = inner.pop_lru() else {
                break;
            };
            if Arc::strong_count(&entry) > 1 {
                // Still borrowed; set aside and retry on a later insert.
                borrowed.push((key, entry));
            }
        }
        for (key, entry) in borrowed {
            inner.push(key, entry);
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

fn fingerprint(encryption_key: Option<&[u8]>) -> u64 {
    let mut hasher = DefaultHasher::new();
    encryption_key.hash(&mut hasher);
    hasher.finish()
}

fn open_sqlite(path: &Path, encryption_key: Option<&[u8]>) -> Result<Connection> {
    let conn = Connection::open(path)
        .map_err(|e| CinchError::storage(format!("open {}", path.display()), e))?;

    if let Some(key) = encryption_key {
        let hex: String = key.iter().map(|b| format!("{b:02x}")).collect();
        conn.execute_batch(&format!("PRAGMA key = \"x'{hex}'\";"))?;
    }

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA foreign_keys = ON;",
    )?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    Ok(conn)
}
