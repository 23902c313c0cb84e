//! CinchDB Storage
//!
//! On-disk layout, metadata store, connection pool, change log persistence,
//! and the maintenance gate. Every other component addresses files through
//! [`ProjectLayout`]; no caller opens a tenant file except via
//! [`ConnectionPool`].

pub mod changelog;
pub mod layout;
pub mod maintenance;
pub mod metadata;
pub mod pool;

pub use changelog::{BranchMetadata, ChangeLog, CHANGES_FORMAT_VERSION};
pub use layout::ProjectLayout;
pub use maintenance::{check_maintenance, maintenance_delay, SKIP_MAINTENANCE_DELAY_ENV};
pub use metadata::{
    close_all_metadata, metadata_store, MaintenanceInfo, MaintenanceScope, MetadataStore,
};
pub use pool::{ConnectionPool, KeyProvider, PooledConnection, DEFAULT_POOL_CAPACITY};
