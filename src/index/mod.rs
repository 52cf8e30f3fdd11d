//! Multitenant index files
//!
//! - **partition**: Mapping chunk time ranges to daily table buckets
//! - **identifier**: File naming and on-disk layout
//! - **format**: The `TSDX` index file format
//! - **builder**: Writing one index file per table period
//! - **file**: Handles to index files on disk
//! - **publisher**: Where finished files are registered
//! - **manager**: Startup recovery and WAL-to-index builds
//! - **scheduler**: Periodic builds
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   multitenant/<bucket>/<unix-secs>-<node>-<checksum>.tsdb
//!   scratch/     (build staging)
//!   wal/<unix-secs>.wal
//! ```

pub mod builder;
pub mod file;
pub mod format;
pub mod identifier;
pub mod manager;
pub mod metrics;
pub mod partition;
pub mod publisher;
pub mod scheduler;

pub use builder::{file_builder_factory, BuilderFactory, BuiltIndex, FileIndexBuilder, IndexBuilder};
pub use file::LoadedIndexFile;
pub use format::{read_header, read_index, IndexContents, IndexHeader, IndexedSeries};
pub use identifier::{ensure_dirs, multitenant_dir, scratch_dir, MultitenantIdentifier, PrefixedIdentifier};
pub use manager::{
    BuildReport, BuiltPeriod, LoadingMode, ManagerConfig, ReservedState, StartSummary, TsdbManager,
};
pub use metrics::{BuildCounters, BuildStats, MetricsSink};
pub use partition::{index_buckets, table_number, TableRange, TableRanges, INDEX_PERIOD};
pub use publisher::{IndexPublisher, LocalPublisher, RegisteredIndex};
pub use scheduler::{BuildScheduler, PassOutcome, ScheduleConfig};
