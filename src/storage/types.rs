//! Core data types shared by WAL recovery and index building
//!
//! - `Labels`: sorted label set identifying a series
//! - `Fingerprint`: hash of a label set used to route queries
//! - `ChunkMeta`: time bounds plus an opaque reference to a stored chunk

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synthetic label carrying the tenant inside a multitenant index
pub const TENANT_LABEL: &str = "__tenant__";

/// Separator byte used when hashing label sets
const HASH_SEP: u8 = 0xff;

/// A single label pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// Label set sorted by name, names unique
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set from (name, value) pairs.
    ///
    /// Later pairs win when a name repeats.
    pub fn from_pairs<N, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        let mut labels = Self::new();
        for (name, value) in pairs {
            labels.set(name, value);
        }
        labels
    }

    /// Insert or replace a label, keeping the set sorted
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.binary_search_by(|l| l.name.as_str().cmp(name.as_str())) {
            Ok(idx) => self.0[idx].value = value,
            Err(idx) => self.0.insert(idx, Label { name, value }),
        }
    }

    /// Copy of this set with one extra (or replaced) label
    pub fn with(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.set(name, value);
        copy
    }

    /// Look up a label value by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|idx| self.0[idx].value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    /// Fingerprint of this exact label set.
    ///
    /// xxHash64 over `name 0xff value 0xff` for every label in order.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut buf = Vec::with_capacity(self.0.iter().map(|l| l.name.len() + l.value.len() + 2).sum());
        for label in &self.0 {
            buf.extend_from_slice(label.name.as_bytes());
            buf.push(HASH_SEP);
            buf.extend_from_slice(label.value.as_bytes());
            buf.push(HASH_SEP);
        }
        Fingerprint(xxhash_rust::xxh64::xxh64(&buf, 0))
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

/// Hash of a label set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Metadata for one stored chunk
///
/// `from`/`through` are Unix milliseconds and describe the half-open
/// interval `[from, through)`. The remaining fields reference the chunk
/// payload and are carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub from: i64,
    pub through: i64,
    pub checksum: u32,
    pub kb: u32,
    pub entries: u32,
}

impl ChunkMeta {
    pub fn new(from: i64, through: i64, checksum: u32) -> Self {
        Self {
            from,
            through,
            checksum,
            kb: 0,
            entries: 0,
        }
    }

    /// Builder method: set payload size and entry count
    pub fn sized(mut self, kb: u32, entries: u32) -> Self {
        self.kb = kb;
        self.entries = entries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_sorted_and_unique() {
        let labels = Labels::from_pairs([("job", "api"), ("app", "loki"), ("job", "web")]);

        let names: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["app", "job"]);
        assert_eq!(labels.get("job"), Some("web"));
        assert_eq!(labels.get("missing"), None);
    }

    #[test]
    fn test_with_leaves_original_untouched() {
        let labels = Labels::from_pairs([("app", "loki")]);
        let tagged = labels.with(TENANT_LABEL, "tenant-a");

        assert_eq!(labels.len(), 1);
        assert_eq!(tagged.len(), 2);
        assert_eq!(tagged.get(TENANT_LABEL), Some("tenant-a"));
    }

    #[test]
    fn test_fingerprint_changes_with_tenant_label() {
        let labels = Labels::from_pairs([("app", "loki"), ("env", "prod")]);
        let tagged = labels.with(TENANT_LABEL, "a");

        assert_eq!(labels.fingerprint(), labels.clone().fingerprint());
        assert_ne!(labels.fingerprint(), tagged.fingerprint());
    }

    #[test]
    fn test_fingerprint_independent_of_insert_order() {
        let a = Labels::from_pairs([("app", "loki"), ("env", "prod")]);
        let b = Labels::from_pairs([("env", "prod"), ("app", "loki")]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_separates_name_and_value() {
        let a = Labels::from_pairs([("ab", "c")]);
        let b = Labels::from_pairs([("a", "bc")]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_labels_display() {
        let labels = Labels::from_pairs([("env", "prod"), ("app", "loki")]);
        assert_eq!(labels.to_string(), r#"{app="loki", env="prod"}"#);
    }
}
