//! Index file identifiers and the local directory layout
//!
//! ```text
//! <root>/
//!   multitenant/
//!     index_19700/
//!       1700000000-ingester-0-9a3f00c1.tsdb
//!   scratch/
//!   wal/
//! ```

use crate::storage::error::TsdbResult;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const INDEX_EXTENSION: &str = "tsdb";

/// Directory holding built multitenant indices, one subdirectory per bucket
pub fn multitenant_dir(root: &Path) -> PathBuf {
    root.join("multitenant")
}

/// Private area builds write into before moving files into place
pub fn scratch_dir(root: &Path) -> PathBuf {
    root.join("scratch")
}

/// Create every directory the manager expects under `root`
pub fn ensure_dirs(root: &Path) -> TsdbResult<()> {
    for dir in [
        multitenant_dir(root),
        scratch_dir(root),
        crate::storage::wal_dir(root),
    ] {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// True when a directory name ends in the table number of a bucket
pub fn is_bucket_name(name: &str) -> bool {
    static BUCKET_NUMBER: OnceLock<Regex> = OnceLock::new();
    BUCKET_NUMBER
        .get_or_init(|| Regex::new(r"[0-9]+$").expect("static regex"))
        .is_match(name)
}

/// Name of a multitenant index file: who built it, when, and its checksum
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultitenantIdentifier {
    node_name: String,
    ts: DateTime<Utc>,
    checksum: u32,
}

impl MultitenantIdentifier {
    /// `ts` is truncated to whole seconds, the resolution of the file name
    pub fn new(node_name: impl Into<String>, ts: DateTime<Utc>, checksum: u32) -> Self {
        let ts = Utc
            .timestamp_opt(ts.timestamp(), 0)
            .single()
            .unwrap_or(ts);
        Self {
            node_name: node_name.into(),
            ts,
            checksum,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// `<unix-seconds>-<node-name>-<checksum:08x>.tsdb`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{:08x}.{}",
            self.ts.timestamp(),
            self.node_name,
            self.checksum,
            INDEX_EXTENSION
        )
    }

    /// Parse a file name produced by [`file_name`](Self::file_name)
    pub fn parse(name: &str) -> Option<Self> {
        static FILE_NAME: OnceLock<Regex> = OnceLock::new();
        let re = FILE_NAME.get_or_init(|| {
            Regex::new(r"^([0-9]+)-(.+)-([0-9a-f]{8})\.tsdb$").expect("static regex")
        });

        let caps = re.captures(name)?;
        let secs: i64 = caps[1].parse().ok()?;
        let ts = Utc.timestamp_opt(secs, 0).single()?;
        let checksum = u32::from_str_radix(&caps[3], 16).ok()?;

        Some(Self {
            node_name: caps[2].to_string(),
            ts,
            checksum,
        })
    }
}

impl fmt::Display for MultitenantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// An identifier placed in a concrete directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefixedIdentifier {
    id: MultitenantIdentifier,
    dir: PathBuf,
}

impl PrefixedIdentifier {
    pub fn new(id: MultitenantIdentifier, dir: impl Into<PathBuf>) -> Self {
        Self {
            id,
            dir: dir.into(),
        }
    }

    /// Identifier for `file_name` inside the bucket directory under `root`
    pub fn in_bucket(id: MultitenantIdentifier, root: &Path, bucket: &str) -> Self {
        Self::new(id, multitenant_dir(root).join(bucket))
    }

    pub fn id(&self) -> &MultitenantIdentifier {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> String {
        self.id.file_name()
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(self.id.file_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_file_name_format() {
        let id = MultitenantIdentifier::new("ingester-0", ts(1_700_000_000), 0x9a3f_00c1);
        assert_eq!(id.file_name(), "1700000000-ingester-0-9a3f00c1.tsdb");
    }

    #[test]
    fn test_parse_keeps_dashes_in_node_name() {
        let id = MultitenantIdentifier::parse("1700000000-ingester-zone-a-2-0000002a.tsdb").unwrap();
        assert_eq!(id.node_name(), "ingester-zone-a-2");
        assert_eq!(id.ts(), ts(1_700_000_000));
        assert_eq!(id.checksum(), 42);
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        for name in [
            "unparsable-file",
            "1700000000-node.tsdb",
            "1700000000-node-xyz00000.tsdb",
            "1700000000-node-0000002a.tsdb.tmp",
            "-node-0000002a.tsdb",
            "1700000000--0000002a.tsdb",
            "abc-node-0000002a.tsdb",
        ] {
            assert!(MultitenantIdentifier::parse(name).is_none(), "{}", name);
        }
    }

    #[test]
    fn test_new_truncates_to_seconds() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let id = MultitenantIdentifier::new("n", precise, 1);
        assert_eq!(MultitenantIdentifier::parse(&id.file_name()), Some(id));
    }

    #[test]
    fn test_bucket_names() {
        assert!(is_bucket_name("17000"));
        assert!(is_bucket_name("index_19700"));
        assert!(!is_bucket_name("badname"));
        assert!(!is_bucket_name("index_19700_old"));
        assert!(!is_bucket_name(""));
    }

    #[test]
    fn test_prefixed_paths() {
        let root = Path::new("/data");
        let id = MultitenantIdentifier::new("n", ts(10), 255);
        let prefixed = PrefixedIdentifier::in_bucket(id, root, "index_1");

        assert_eq!(prefixed.dir(), Path::new("/data/multitenant/index_1"));
        assert_eq!(
            prefixed.path(),
            PathBuf::from("/data/multitenant/index_1/10-n-000000ff.tsdb")
        );
    }

    #[test]
    fn test_ensure_dirs() {
        let dir = tempdir().unwrap();
        ensure_dirs(dir.path()).unwrap();
        assert!(multitenant_dir(dir.path()).is_dir());
        assert!(scratch_dir(dir.path()).is_dir());
        assert!(dir.path().join("wal").is_dir());
    }
}
