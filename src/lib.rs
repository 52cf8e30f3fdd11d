//! # TSDB Manager
//!
//! Lifecycle of multi-tenant TSDB index files on a single ingester node.
//!
//! ## Features
//!
//! - **Startup recovery**: Registers index files left on disk by earlier runs
//! - **WAL builds**: Turns replayed WAL segments into one index file per daily table period
//! - **Multi-tenancy**: Every tenant's series share a file, tagged with `__tenant__`
//! - **Crash safety**: Files are staged in scratch, fsynced and renamed into place
//!
//! ## Modules
//!
//! - [`storage`]: WAL segments, head recovery and shared types
//! - [`index`]: Partitioning, index files, the manager and its scheduler
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsdb_manager::index::{ensure_dirs, LocalPublisher, TsdbManager};
//! use tsdb_manager::storage::list_wals;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = tsdb_manager::Config::load_default();
//!     let root = config.data_dir();
//!     ensure_dirs(&root)?;
//!
//!     let publisher = Arc::new(LocalPublisher::new());
//!     let manager = TsdbManager::new(config.manager_config(), config.table_ranges()?, publisher.clone());
//!
//!     let summary = manager.start()?;
//!     println!("recovered {} index files", summary.indices);
//!
//!     let wals = list_wals(&root)?;
//!     let report = manager.build_from_wals(chrono::Utc::now(), &wals)?;
//!     println!("built {} periods", report.periods.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod index;
pub mod storage;

pub use config::{generate_default_config, Config, ConfigError, LoggingConfig};

pub use index::{
    BuildReport, BuildScheduler, IndexPublisher, LoadedIndexFile, LocalPublisher, ManagerConfig,
    StartSummary, TableRanges, TsdbManager,
};

pub use storage::{BuildFailure, TsdbError, TsdbResult, WalIdentifier};
