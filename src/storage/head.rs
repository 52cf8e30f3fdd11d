//! Head recovery from WAL segments
//!
//! Replays a set of segments into per-tenant in-memory heads and exposes them
//! as a single-pass iteration over `(tenant, labels, chunks)`.
//!
//! ```text
//! wal/100.wal ─┐
//! wal/160.wal ─┼─► TenantHeads { tenant → series_ref → (labels, chunks) }
//! wal/220.wal ─┘                 │
//!                                └─► for_all(visit)
//! ```

use crate::storage::error::{TsdbError, TsdbResult};
use crate::storage::types::{ChunkMeta, Labels};
use crate::storage::wal::{read_segment, WalIdentifier, WalRecord};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Callback invoked once per recovered series
pub type SeriesVisitor<'a> = dyn FnMut(&str, &Labels, &[ChunkMeta]) -> TsdbResult<()> + 'a;

/// Result of a recovery: something that can be visited series by series
pub trait RecoveredHeads: Send {
    /// Visit every `(tenant, labels, chunks)` triple.
    ///
    /// An error returned by `visit` aborts the iteration and is returned.
    fn for_all(&self, visit: &mut SeriesVisitor<'_>) -> TsdbResult<()>;
}

/// Replays WAL segments into [`RecoveredHeads`]
pub trait HeadRecovery: Send + Sync {
    fn recover(&self, ts: DateTime<Utc>, ids: &[WalIdentifier])
        -> TsdbResult<Box<dyn RecoveredHeads>>;
}

#[derive(Debug, Default)]
struct RecoveredSeries {
    labels: Labels,
    chunks: Vec<ChunkMeta>,
    seen: HashSet<ChunkMeta>,
}

#[derive(Debug, Default)]
struct TenantHead {
    series: BTreeMap<u64, RecoveredSeries>,
}

/// In-memory per-tenant heads rebuilt from WAL records
#[derive(Debug)]
pub struct TenantHeads {
    start: DateTime<Utc>,
    tenants: BTreeMap<String, TenantHead>,
}

impl TenantHeads {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            tenants: BTreeMap::new(),
        }
    }

    /// Time the heads were recovered as of
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Apply one WAL record
    pub fn apply(&mut self, record: WalRecord) -> TsdbResult<()> {
        match record {
            WalRecord::Series {
                tenant,
                series_ref,
                labels,
            } => {
                let head = self.tenants.entry(tenant).or_default();
                head.series.entry(series_ref).or_default().labels = labels;
            }
            WalRecord::Chunks {
                tenant,
                series_ref,
                chunks,
            } => {
                let series = self
                    .tenants
                    .get_mut(&tenant)
                    .and_then(|head| head.series.get_mut(&series_ref))
                    .ok_or_else(|| {
                        TsdbError::Wal(format!(
                            "chunks for unknown series ref {} (tenant {})",
                            series_ref, tenant
                        ))
                    })?;
                for chunk in chunks {
                    if series.seen.insert(chunk) {
                        series.chunks.push(chunk);
                    }
                }
            }
        }
        Ok(())
    }

    /// Number of tenants with at least one series
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    /// Total series across all tenants
    pub fn series_count(&self) -> usize {
        self.tenants.values().map(|h| h.series.len()).sum()
    }
}

impl RecoveredHeads for TenantHeads {
    fn for_all(&self, visit: &mut SeriesVisitor<'_>) -> TsdbResult<()> {
        for (tenant, head) in &self.tenants {
            for series in head.series.values() {
                visit(tenant, &series.labels, &series.chunks)?;
            }
        }
        Ok(())
    }
}

/// Recovers heads from the segments under `<root>/wal`
#[derive(Debug, Clone)]
pub struct WalHeadRecovery {
    root: PathBuf,
}

impl WalHeadRecovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Replay the given segments, oldest first, into fresh heads
    pub fn recover_heads(
        &self,
        ts: DateTime<Utc>,
        ids: &[WalIdentifier],
    ) -> TsdbResult<TenantHeads> {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut heads = TenantHeads::new(ts);
        for id in ordered {
            let path = id.path(&self.root);
            let records = read_segment(&path).map_err(|e| match e {
                TsdbError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    TsdbError::Wal(format!("missing WAL segment {}", path.display()))
                }
                other => other,
            })?;
            tracing::debug!(wal = %id, records = records.len(), "replaying WAL segment");
            for record in records {
                heads.apply(record)?;
            }
        }
        Ok(heads)
    }
}

impl HeadRecovery for WalHeadRecovery {
    fn recover(
        &self,
        ts: DateTime<Utc>,
        ids: &[WalIdentifier],
    ) -> TsdbResult<Box<dyn RecoveredHeads>> {
        Ok(Box::new(self.recover_heads(ts, ids)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::{WalSyncMode, WalWriter};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn wal_id(secs: i64) -> WalIdentifier {
        WalIdentifier::new(Utc.timestamp_opt(secs, 0).unwrap())
    }

    fn collect(heads: &dyn RecoveredHeads) -> Vec<(String, Labels, Vec<ChunkMeta>)> {
        let mut out = Vec::new();
        heads
            .for_all(&mut |tenant, labels, chunks| {
                out.push((tenant.to_string(), labels.clone(), chunks.to_vec()));
                Ok(())
            })
            .unwrap();
        out
    }

    #[test]
    fn test_recover_across_segments() {
        let dir = tempdir().unwrap();
        let labels = Labels::from_pairs([("app", "api")]);

        {
            let mut wal = WalWriter::create(dir.path(), wal_id(100), WalSyncMode::None).unwrap();
            wal.append(&WalRecord::Series {
                tenant: "b".into(),
                series_ref: 1,
                labels: labels.clone(),
            })
            .unwrap();
            wal.append(&WalRecord::Series {
                tenant: "a".into(),
                series_ref: 1,
                labels: labels.clone(),
            })
            .unwrap();
        }
        {
            let mut wal = WalWriter::create(dir.path(), wal_id(200), WalSyncMode::None).unwrap();
            wal.append(&WalRecord::Chunks {
                tenant: "a".into(),
                series_ref: 1,
                chunks: vec![ChunkMeta::new(0, 10, 1)],
            })
            .unwrap();
            wal.append(&WalRecord::Chunks {
                tenant: "b".into(),
                series_ref: 1,
                chunks: vec![ChunkMeta::new(5, 15, 2)],
            })
            .unwrap();
        }

        let recovery = WalHeadRecovery::new(dir.path());
        let heads = recovery
            .recover(Utc::now(), &[wal_id(200), wal_id(100)])
            .unwrap();
        let visited = collect(heads.as_ref());

        assert_eq!(visited.len(), 2);
        assert_eq!(visited[0].0, "a");
        assert_eq!(visited[0].2, vec![ChunkMeta::new(0, 10, 1)]);
        assert_eq!(visited[1].0, "b");
        assert_eq!(visited[1].2, vec![ChunkMeta::new(5, 15, 2)]);
    }

    #[test]
    fn test_missing_segment_is_error() {
        let dir = tempdir().unwrap();
        let recovery = WalHeadRecovery::new(dir.path());
        let err = recovery.recover_heads(Utc::now(), &[wal_id(1)]).unwrap_err();
        assert!(matches!(err, TsdbError::Wal(_)));
    }

    #[test]
    fn test_chunks_for_unknown_series() {
        let mut heads = TenantHeads::new(Utc::now());
        let err = heads
            .apply(WalRecord::Chunks {
                tenant: "a".into(),
                series_ref: 9,
                chunks: vec![ChunkMeta::new(0, 1, 1)],
            })
            .unwrap_err();
        assert!(matches!(err, TsdbError::Wal(_)));
    }

    #[test]
    fn test_duplicate_chunks_dropped() {
        let mut heads = TenantHeads::new(Utc::now());
        heads
            .apply(WalRecord::Series {
                tenant: "a".into(),
                series_ref: 1,
                labels: Labels::from_pairs([("app", "api")]),
            })
            .unwrap();
        for _ in 0..2 {
            heads
                .apply(WalRecord::Chunks {
                    tenant: "a".into(),
                    series_ref: 1,
                    chunks: vec![ChunkMeta::new(0, 1, 1)],
                })
                .unwrap();
        }

        assert_eq!(heads.tenant_count(), 1);
        assert_eq!(heads.series_count(), 1);
        assert_eq!(collect(&heads)[0].2.len(), 1);
    }

    #[test]
    fn test_long_replay_keeps_first_seen_order() {
        let mut heads = TenantHeads::new(Utc::now());
        heads
            .apply(WalRecord::Series {
                tenant: "a".into(),
                series_ref: 1,
                labels: Labels::from_pairs([("app", "api")]),
            })
            .unwrap();

        // every record repeats the previous record's last chunk
        for i in 0..5_000i64 {
            heads
                .apply(WalRecord::Chunks {
                    tenant: "a".into(),
                    series_ref: 1,
                    chunks: vec![
                        ChunkMeta::new((i - 1).max(0), (i - 1).max(0) + 1, 7),
                        ChunkMeta::new(i, i + 1, 7),
                    ],
                })
                .unwrap();
        }

        let chunks = collect(&heads).remove(0).2;
        assert_eq!(chunks.len(), 5_000);
        assert!(chunks.windows(2).all(|w| w[0].from + 1 == w[1].from));
    }

    #[test]
    fn test_visit_error_aborts() {
        let mut heads = TenantHeads::new(Utc::now());
        for (i, tenant) in ["a", "b", "c"].iter().enumerate() {
            heads
                .apply(WalRecord::Series {
                    tenant: tenant.to_string(),
                    series_ref: i as u64,
                    labels: Labels::new(),
                })
                .unwrap();
        }

        let mut calls = 0;
        let result = heads.for_all(&mut |_, _, _| {
            calls += 1;
            Err(TsdbError::Corruption("stop".into()))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
