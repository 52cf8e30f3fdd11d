//! TSDB Manager - turns WALs into multitenant index files
//!
//! Responsibilities:
//! - Registering leftover local index files with the publisher at startup
//! - Building one index file per table period from a set of WAL segments
//!
//! # Build pass
//!
//! ```text
//! WAL ids ──► HeadRecovery ──► for_all(tenant, labels, chunks)
//!                                  │
//!                  index_buckets(chunk) per chunk
//!                                  │
//!            bucket → Builder (lazy), labels + {__tenant__=tenant}
//!                                  │
//!        per bucket: build in scratch ─► multitenant/<bucket>/ ─► add_index
//! ```
//!
//! A pass is not atomic across periods. When period N fails, periods
//! before it stay on disk and registered; [`BuildFailure`] lists them.

use crate::index::builder::{file_builder_factory, BuilderFactory, IndexBuilder};
use crate::index::file::LoadedIndexFile;
use crate::index::identifier::{
    is_bucket_name, multitenant_dir, scratch_dir, MultitenantIdentifier, PrefixedIdentifier,
};
use crate::index::metrics::{BuildCounters, MetricsSink};
use crate::index::partition::{index_buckets, TableRanges};
use crate::index::publisher::IndexPublisher;
use crate::storage::error::{BuildFailure, TsdbError, TsdbResult};
use crate::storage::head::{HeadRecovery, WalHeadRecovery};
use crate::storage::types::{ChunkMeta, Labels, TENANT_LABEL};
use crate::storage::wal::WalIdentifier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// What startup does with a file whose name parses but whose header doesn't
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadingMode {
    /// Count the failure and still register an unverified handle
    #[default]
    Lenient,
    /// Count the failure and skip the file
    Strict,
}

/// Configuration for the manager
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Name of this node, embedded in every built file name
    pub node_name: String,
    /// Root directory holding `multitenant/`, `scratch/` and `wal/`
    pub dir: PathBuf,
    pub loading: LoadingMode,
}

impl ManagerConfig {
    pub fn new(node_name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            node_name: node_name.into(),
            dir: dir.into(),
            loading: LoadingMode::default(),
        }
    }
}

/// Placeholder for manager state shared with query paths.
///
/// Nothing is stored here yet. Code that adds shared mutable fields to the
/// manager must put them behind [`TsdbManager::read_state`] /
/// [`TsdbManager::write_state`].
#[derive(Debug, Default)]
pub struct ReservedState {}

/// Counts reported by [`TsdbManager::start`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StartSummary {
    /// Bucket directories scanned
    pub buckets: usize,
    /// Files whose names parsed as index identifiers
    pub indices: usize,
    /// Files that failed to open or register
    pub failures: usize,
}

/// One period produced by a build pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuiltPeriod {
    pub bucket: String,
    pub path: PathBuf,
    pub series: usize,
    pub checksum: u32,
}

/// Outcome of a successful build pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub ts: DateTime<Utc>,
    /// Series visited during recovery
    pub series: usize,
    /// Periods built and registered, in bucket key order
    pub periods: Vec<BuiltPeriod>,
}

/// Manages multitenant index files on local disk
pub struct TsdbManager {
    node_name: String,
    dir: PathBuf,
    loading: LoadingMode,
    table_ranges: TableRanges,
    publisher: Arc<dyn IndexPublisher>,
    recovery: Arc<dyn HeadRecovery>,
    new_builder: BuilderFactory,
    metrics: Arc<dyn MetricsSink>,
    state: RwLock<ReservedState>,
}

impl TsdbManager {
    /// Create a manager using WAL recovery from `config.dir`, the file index
    /// builder and in-process build counters
    pub fn new(
        config: ManagerConfig,
        table_ranges: TableRanges,
        publisher: Arc<dyn IndexPublisher>,
    ) -> Self {
        Self {
            recovery: Arc::new(WalHeadRecovery::new(&config.dir)),
            node_name: config.node_name,
            dir: config.dir,
            loading: config.loading,
            table_ranges,
            publisher,
            new_builder: file_builder_factory(),
            metrics: Arc::new(BuildCounters::new()),
            state: RwLock::new(ReservedState::default()),
        }
    }

    /// Replace the WAL recovery collaborator
    pub fn with_recovery(mut self, recovery: Arc<dyn HeadRecovery>) -> Self {
        self.recovery = recovery;
        self
    }

    /// Replace the builder factory
    pub fn with_builder_factory(mut self, factory: BuilderFactory) -> Self {
        self.new_builder = factory;
        self
    }

    /// Report build outcomes to `metrics`
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn loading_mode(&self) -> LoadingMode {
        self.loading
    }

    pub fn table_ranges(&self) -> &TableRanges {
        &self.table_ranges
    }

    // ==================== Reserved State ====================

    /// Shared access to the reserved state
    pub fn read_state(&self) -> TsdbResult<RwLockReadGuard<'_, ReservedState>> {
        self.state.read().map_err(|e| TsdbError::Lock(e.to_string()))
    }

    /// Exclusive access to the reserved state
    pub fn write_state(&self) -> TsdbResult<RwLockWriteGuard<'_, ReservedState>> {
        self.state.write().map_err(|e| TsdbError::Lock(e.to_string()))
    }

    // ==================== Startup ====================

    /// Register every leftover index file under `<dir>/multitenant`.
    ///
    /// Performs no writes. Fails when the multitenant directory can't be
    /// listed or the publisher rejects a file.
    pub fn start(&self) -> TsdbResult<StartSummary> {
        let mut summary = StartSummary::default();
        let result = self.load_local_indices(&mut summary);

        match &result {
            Ok(()) => tracing::info!(
                successful = true,
                buckets = summary.buckets,
                indices = summary.indices,
                failures = summary.failures,
                "loaded leftover local indices"
            ),
            Err(e) => tracing::info!(
                successful = false,
                err = %e,
                buckets = summary.buckets,
                indices = summary.indices,
                failures = summary.failures,
                "loaded leftover local indices"
            ),
        }

        result.map(|()| summary)
    }

    fn load_local_indices(&self, summary: &mut StartSummary) -> TsdbResult<()> {
        let root = multitenant_dir(&self.dir);
        let entries = std::fs::read_dir(&root)
            .map_err(|e| TsdbError::from(e).context("listing multitenant index directory"))?;

        let mut buckets = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| TsdbError::from(e).context("listing multitenant index directory"))?;
            match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(
                        path = %entry.path().display(),
                        err = %e,
                        "failed to read entry type, skipping"
                    );
                    continue;
                }
            }

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!(name = ?raw, "directory name is not valid UTF-8");
                    continue;
                }
            };
            if !is_bucket_name(&name) {
                tracing::warn!(
                    name = %name,
                    "directory name does not match expected bucket name pattern"
                );
                continue;
            }
            buckets.push(name);
        }
        buckets.sort();

        for bucket in buckets {
            summary.buckets += 1;
            self.load_bucket(&root.join(&bucket), &bucket, summary)?;
        }
        Ok(())
    }

    fn load_bucket(&self, dir: &Path, bucket: &str, summary: &mut StartSummary) -> TsdbResult<()> {
        let mut names = match list_file_names(dir) {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!(bucket, err = %e, "failed to open period bucket dir");
                return Ok(());
            }
        };
        names.sort();

        for name in names {
            let Some(id) = MultitenantIdentifier::parse(&name) else {
                continue;
            };
            summary.indices += 1;

            let prefixed = PrefixedIdentifier::new(id, dir);
            let loaded = match LoadedIndexFile::open(prefixed.clone(), true) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(
                        path = %prefixed.path().display(),
                        err = %e,
                        "failed to open local index"
                    );
                    summary.failures += 1;
                    match self.loading {
                        LoadingMode::Strict => continue,
                        LoadingMode::Lenient => LoadedIndexFile::unverified(prefixed, true),
                    }
                }
            };

            if let Err(e) = self.publisher.add_index(bucket, "", loaded) {
                summary.failures += 1;
                return Err(e);
            }
        }
        Ok(())
    }

    // ==================== Building ====================

    /// Build and register one index file per table period touched by the
    /// series recovered from `ids` as of `ts`.
    ///
    /// Callers must not run overlapping builds on the same manager. Any
    /// error means the whole `(ts, ids)` pass should be retried.
    pub fn build_from_wals(
        &self,
        ts: DateTime<Utc>,
        ids: &[WalIdentifier],
    ) -> Result<BuildReport, BuildFailure> {
        tracing::debug!(n = ids.len(), ts = %ts, "building WALs");

        self.metrics.index_creation();
        let result = self.build_periods(ts, ids);
        if let Err(failure) = &result {
            self.metrics.index_creation_failure();
            tracing::error!(
                err = %failure.source,
                registered = ?failure.registered,
                "building TSDB from WALs"
            );
        }
        result
    }

    fn build_periods(
        &self,
        ts: DateTime<Utc>,
        ids: &[WalIdentifier],
    ) -> Result<BuildReport, BuildFailure> {
        tracing::debug!("recovering tenant heads");
        let heads = self
            .recovery
            .recover(ts, ids)
            .map_err(|e| BuildFailure::new(e.context("building TSDB from WALs"), Vec::new()))?;

        let mut periods: BTreeMap<String, Box<dyn IndexBuilder>> = BTreeMap::new();
        let mut series = 0usize;

        heads
            .for_all(&mut |tenant: &str, labels: &Labels, chunks: &[ChunkMeta]| {
                series += 1;

                // chunks crossing a period boundary go to every period they touch
                let mut by_bucket: BTreeMap<String, Vec<ChunkMeta>> = BTreeMap::new();
                for chunk in chunks {
                    for bucket in index_buckets(chunk.from, chunk.through, &self.table_ranges)? {
                        by_bucket.entry(bucket).or_default().push(*chunk);
                    }
                }

                // queries compute fingerprints without the tenant label
                let fingerprint = labels.fingerprint();
                let with_tenant = labels.with(TENANT_LABEL, tenant);

                for (bucket, matching) in by_bucket {
                    periods
                        .entry(bucket)
                        .or_insert_with(|| (self.new_builder)())
                        .add_series(with_tenant.clone(), fingerprint, matching);
                }
                Ok(())
            })
            .map_err(|e| BuildFailure::new(e, Vec::new()))?;

        let scratch = scratch_dir(&self.dir);
        let mut registered = Vec::with_capacity(periods.len());
        let mut built = Vec::with_capacity(periods.len());

        for (bucket, builder) in periods {
            let dst_dir = multitenant_dir(&self.dir).join(&bucket);
            tracing::debug!(pd = %bucket, dst = %dst_dir.display(), "building tsdb for period");

            let start = Instant::now();
            let result = builder.build(&scratch, &mut |_, _, checksum| {
                PrefixedIdentifier::new(
                    MultitenantIdentifier::new(self.node_name.clone(), ts, checksum),
                    &dst_dir,
                )
            });
            let index = match result {
                Ok(index) => index,
                Err(e) => return Err(BuildFailure::new(e, registered)),
            };

            tracing::debug!(
                pd = %bucket,
                dst = %index.identifier.path().display(),
                duration = ?start.elapsed(),
                "finished building tsdb for period"
            );

            let loaded = match LoadedIndexFile::open(index.identifier.clone(), false) {
                Ok(loaded) => loaded,
                Err(e) => return Err(BuildFailure::new(e, registered)),
            };
            if let Err(e) = self.publisher.add_index(&bucket, "", loaded) {
                return Err(BuildFailure::new(e, registered));
            }

            built.push(BuiltPeriod {
                bucket: bucket.clone(),
                path: index.identifier.path(),
                series: index.series,
                checksum: index.checksum,
            });
            registered.push(bucket);
        }

        Ok(BuildReport {
            ts,
            series,
            periods: built,
        })
    }
}

fn list_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        if let Ok(name) = entry?.file_name().into_string() {
            names.push(name);
        }
    }
    Ok(names)
}
