//! Table-period partitioning
//!
//! Index files are bucketed by fixed 24h table periods. A table number is
//! `floor(unix_time / period)`; a bucket key is the prefix configured for that
//! table number followed by the number itself, e.g. `index_19700`.

use crate::storage::error::{TsdbError, TsdbResult};
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Duration of one index table
pub const INDEX_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// [`INDEX_PERIOD`] in milliseconds
pub const INDEX_PERIOD_MS: i64 = INDEX_PERIOD.as_millis() as i64;

/// Table number containing a Unix millisecond timestamp
pub fn table_number(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(INDEX_PERIOD_MS)
}

/// Table number containing a point in time
pub fn table_number_for(ts: DateTime<Utc>) -> i64 {
    table_number(ts.timestamp_millis())
}

/// Inclusive range of table numbers sharing one bucket prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRange {
    pub start: i64,
    pub end: i64,
    pub prefix: String,
}

impl TableRange {
    pub fn contains(&self, table: i64) -> bool {
        self.start <= table && table <= self.end
    }

    /// Bucket key for a table number in this range
    pub fn bucket_key(&self, table: i64) -> String {
        format!("{}{}", self.prefix, table)
    }
}

/// Schema periods as table ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableRanges(Vec<TableRange>);

impl TableRanges {
    pub fn new(ranges: Vec<TableRange>) -> Self {
        Self(ranges)
    }

    /// Derive ranges from `(first day, prefix)` periods.
    ///
    /// Each period starts at the table containing its first day and ends right
    /// before the next period's start table. The last period is open-ended.
    pub fn from_periods(periods: &[(NaiveDate, String)]) -> TsdbResult<Self> {
        if periods.is_empty() {
            return Err(TsdbError::Config("at least one period is required".into()));
        }

        let mut starts = Vec::with_capacity(periods.len());
        for (from, prefix) in periods {
            if prefix.is_empty() {
                return Err(TsdbError::Config(format!(
                    "period starting {} has an empty prefix",
                    from
                )));
            }
            let midnight = from.and_hms_opt(0, 0, 0).ok_or_else(|| {
                TsdbError::Config(format!("invalid period start {}", from))
            })?;
            starts.push((table_number(midnight.and_utc().timestamp_millis()), prefix));
        }

        if starts.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(TsdbError::Config(
                "period start dates must be strictly increasing".into(),
            ));
        }

        let ranges = starts
            .iter()
            .enumerate()
            .map(|(i, (start, prefix))| TableRange {
                start: *start,
                end: starts.get(i + 1).map(|(next, _)| next - 1).unwrap_or(i64::MAX),
                prefix: prefix.to_string(),
            })
            .collect();

        Ok(Self(ranges))
    }

    /// Configuration covering a table number, if any
    pub fn config_for_table_number(&self, table: i64) -> Option<&TableRange> {
        self.0.iter().find(|r| r.contains(table))
    }

    pub fn ranges(&self) -> &[TableRange] {
        &self.0
    }
}

/// Bucket keys for every table touched by `[from, through)`.
///
/// Covers table numbers `floor(from/period)..=floor(through/period)` in
/// increasing order. Fails without a partial result when any of them has no
/// configuration.
pub fn index_buckets(from: i64, through: i64, ranges: &TableRanges) -> TsdbResult<Vec<String>> {
    let start = table_number(from);
    let end = table_number(through);

    let mut buckets = Vec::new();
    for table in start..=end {
        let cfg = ranges
            .config_for_table_number(table)
            .ok_or(TsdbError::MissingTableConfig(table))?;
        buckets.push(cfg.bucket_key(table));
    }
    Ok(buckets)
}
