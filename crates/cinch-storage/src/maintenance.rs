//! Maintenance gate.
//!
//! Consulted before any mutating operation on a database or branch. Reads
//! are never gated. When maintenance status cannot be determined (e.g. the
//! metadata store is missing during bootstrap), checks fail open so the
//! engine cannot deadlock itself before initialization.

use std::path::Path;
use std::time::Duration;

use cinch_core::{CinchError, Result};

use crate::metadata::metadata_store;

/// Environment flag suppressing artificial waits during maintenance
/// transitions. Set by the test harness.
pub const SKIP_MAINTENANCE_DELAY_ENV: &str = "CINCHDB_SKIP_MAINTENANCE_DELAY";

/// Grace period after entering maintenance, letting in-flight writes drain
/// before files are copied.
const MAINTENANCE_SETTLE: Duration = Duration::from_millis(100);

/// Fail the caller with `Maintenance` if the database (or branch) is in
/// maintenance mode.
///
/// Lookup failures are swallowed and the operation proceeds; the gate must
/// never block work just because the status could not be read.
pub fn check_maintenance(project_root: &Path, database: &str, branch: Option<&str>) -> Result<()> {
    let store = match metadata_store(project_root) {
        Ok(store) => store,
        Err(e) => {
            tracing::debug!("maintenance check skipped: {e}");
            return Ok(());
        }
    };

    match store.is_in_maintenance(database, branch) {
        Ok(true) => {
            let reason = store
                .get_maintenance_info(database, branch)
                .ok()
                .flatten()
                .map(|info| info.reason)
                .unwrap_or_else(|| "maintenance in progress".to_string());
            let target = match branch {
                Some(branch) => format!("branch '{database}/{branch}'"),
                None => format!("database '{database}'"),
            };
            Err(CinchError::Maintenance(format!(
                "{target} is in maintenance mode: {reason}"
            )))
        }
        Ok(false) => Ok(()),
        Err(e) => {
            tracing::debug!("maintenance check skipped: {e}");
            Ok(())
        }
    }
}

/// Sleep out the maintenance settle window, unless suppressed via
/// [`SKIP_MAINTENANCE_DELAY_ENV`].
pub fn maintenance_delay() {
    if std::env::var_os(SKIP_MAINTENANCE_DELAY_ENV).is_none() {
        std::thread::sleep(MAINTENANCE_SETTLE);
    }
}
