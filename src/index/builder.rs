//! Index builders
//!
//! A builder accumulates series for one table period during a single build
//! pass, then writes them to one index file. The destination name is only
//! decided once the content checksum is known:
//!
//! ```text
//! add_series × N ─► build(scratch, identifier_fn)
//!                      ├─ encode + checksum
//!                      ├─ write scratch/<tmp>, fsync
//!                      ├─ identifier_fn(from, through, checksum) → dst
//!                      └─ rename into dst dir, fsync dir
//! ```

use crate::index::format::{encode_index, IndexContents, IndexedSeries};
use crate::index::identifier::PrefixedIdentifier;
use crate::storage::error::TsdbResult;
use crate::storage::types::{ChunkMeta, Fingerprint, Labels};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Assigns the destination of a build from `(from, through, checksum)`
pub type IdentifierFn<'a> = dyn FnMut(i64, i64, u32) -> PrefixedIdentifier + 'a;

/// Creates a fresh builder for each table period of a build pass
pub type BuilderFactory = Arc<dyn Fn() -> Box<dyn IndexBuilder> + Send + Sync>;

/// Summary of a finished build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltIndex {
    pub identifier: PrefixedIdentifier,
    pub from: i64,
    pub through: i64,
    pub checksum: u32,
    pub series: usize,
}

/// Accumulates series and finalizes them into one index file
pub trait IndexBuilder: Send {
    /// Add a series. Repeated calls for the same labels merge their chunks.
    fn add_series(&mut self, labels: Labels, fingerprint: Fingerprint, chunks: Vec<ChunkMeta>);

    /// Write the index through `scratch_dir` to the identifier returned by
    /// `identifier`. Consumes the builder.
    fn build(
        self: Box<Self>,
        scratch_dir: &Path,
        identifier: &mut IdentifierFn<'_>,
    ) -> TsdbResult<BuiltIndex>;
}

/// Factory for [`FileIndexBuilder`]
pub fn file_builder_factory() -> BuilderFactory {
    Arc::new(|| Box::new(FileIndexBuilder::new()) as Box<dyn IndexBuilder>)
}

#[derive(Debug)]
struct PendingSeries {
    fingerprint: Fingerprint,
    chunks: Vec<ChunkMeta>,
}

/// Builds the `TSDX` file format
#[derive(Debug, Default)]
pub struct FileIndexBuilder {
    series: BTreeMap<Labels, PendingSeries>,
}

impl FileIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    fn finish(self) -> (i64, i64, IndexContents) {
        let mut from = i64::MAX;
        let mut through = i64::MIN;

        let series = self
            .series
            .into_iter()
            .map(|(labels, mut pending)| {
                pending.chunks.sort();
                pending.chunks.dedup();
                for chunk in &pending.chunks {
                    from = from.min(chunk.from);
                    through = through.max(chunk.through);
                }
                IndexedSeries {
                    labels,
                    fingerprint: pending.fingerprint,
                    chunks: pending.chunks,
                }
            })
            .collect();

        if from > through {
            from = 0;
            through = 0;
        }
        (from, through, IndexContents { series })
    }
}

impl IndexBuilder for FileIndexBuilder {
    fn add_series(&mut self, labels: Labels, fingerprint: Fingerprint, chunks: Vec<ChunkMeta>) {
        self.series
            .entry(labels)
            .or_insert_with(|| PendingSeries {
                fingerprint,
                chunks: Vec::new(),
            })
            .chunks
            .extend(chunks);
    }

    fn build(
        self: Box<Self>,
        scratch_dir: &Path,
        identifier: &mut IdentifierFn<'_>,
    ) -> TsdbResult<BuiltIndex> {
        let (from, through, contents) = self.finish();
        let series = contents.series.len();
        let (header, body) = encode_index(from, through, &contents)?;

        std::fs::create_dir_all(scratch_dir)?;
        let tmp = scratch_path(scratch_dir);
        if let Err(e) = write_synced(&tmp, &header.to_bytes(), &body) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        let dst = identifier(from, through, header.body_checksum);
        if let Err(e) = move_into_place(&tmp, &dst) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }

        Ok(BuiltIndex {
            identifier: dst,
            from,
            through,
            checksum: header.body_checksum,
            series,
        })
    }
}

/// Unique file name inside the scratch area
fn scratch_path(scratch_dir: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let seq = NEXT.fetch_add(1, Ordering::Relaxed);
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    scratch_dir.join(format!("build-{}-{}-{}.tmp", std::process::id(), nanos, seq))
}

fn write_synced(path: &Path, header: &[u8], body: &[u8]) -> TsdbResult<()> {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(header)?;
    file.write_all(body)?;
    file.flush()?;
    file.get_ref().sync_all()?;
    Ok(())
}

/// Rename a synced scratch file to its destination and persist the rename.
///
/// An existing file at the destination is replaced. A retried build produces
/// the same name for the same content.
fn move_into_place(tmp: &Path, dst: &PrefixedIdentifier) -> TsdbResult<()> {
    std::fs::create_dir_all(dst.dir())?;
    std::fs::rename(tmp, dst.path())?;
    sync_dir(dst.dir())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> TsdbResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> TsdbResult<()> {
    Ok(())
}
