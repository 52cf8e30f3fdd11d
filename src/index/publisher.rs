//! Index publishers
//!
//! The publisher takes ownership of every index file the manager produces or
//! recovers. Upload to remote storage is left to implementations of
//! [`IndexPublisher`]; [`LocalPublisher`] keeps files queryable in-process.

use crate::index::file::LoadedIndexFile;
use crate::storage::error::{TsdbError, TsdbResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

/// Accepts index files for a bucket and makes them available
pub trait IndexPublisher: Send + Sync {
    /// Register `file` under `bucket`. `tenant` is empty for multitenant files.
    fn add_index(&self, bucket: &str, tenant: &str, file: LoadedIndexFile) -> TsdbResult<()>;
}

/// A registered index, as listed by [`LocalPublisher::registered`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredIndex {
    pub bucket: String,
    pub tenant: String,
    pub path: PathBuf,
    pub read_only: bool,
    pub verified: bool,
}

type BucketFiles = BTreeMap<String, Vec<LoadedIndexFile>>;

/// In-process publisher keyed by bucket then tenant
#[derive(Debug, Default)]
pub struct LocalPublisher {
    buckets: RwLock<BTreeMap<String, BucketFiles>>,
}

impl LocalPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bucket keys with at least one file
    pub fn buckets(&self) -> TsdbResult<Vec<String>> {
        let buckets = self
            .buckets
            .read()
            .map_err(|e| TsdbError::Lock(e.to_string()))?;
        Ok(buckets.keys().cloned().collect())
    }

    /// Files registered for one bucket and tenant
    pub fn indices(&self, bucket: &str, tenant: &str) -> TsdbResult<Vec<LoadedIndexFile>> {
        let buckets = self
            .buckets
            .read()
            .map_err(|e| TsdbError::Lock(e.to_string()))?;
        Ok(buckets
            .get(bucket)
            .and_then(|tenants| tenants.get(tenant))
            .cloned()
            .unwrap_or_default())
    }

    /// Total number of registered files
    pub fn len(&self) -> TsdbResult<usize> {
        let buckets = self
            .buckets
            .read()
            .map_err(|e| TsdbError::Lock(e.to_string()))?;
        Ok(buckets
            .values()
            .flat_map(|tenants| tenants.values())
            .map(Vec::len)
            .sum())
    }

    pub fn is_empty(&self) -> TsdbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Flat listing of everything registered, ordered by bucket and tenant
    pub fn registered(&self) -> TsdbResult<Vec<RegisteredIndex>> {
        let buckets = self
            .buckets
            .read()
            .map_err(|e| TsdbError::Lock(e.to_string()))?;

        let mut out = Vec::new();
        for (bucket, tenants) in buckets.iter() {
            for (tenant, files) in tenants {
                for file in files {
                    out.push(RegisteredIndex {
                        bucket: bucket.clone(),
                        tenant: tenant.clone(),
                        path: file.path(),
                        read_only: file.is_read_only(),
                        verified: file.is_verified(),
                    });
                }
            }
        }
        Ok(out)
    }
}

impl IndexPublisher for LocalPublisher {
    fn add_index(&self, bucket: &str, tenant: &str, file: LoadedIndexFile) -> TsdbResult<()> {
        let mut buckets = self
            .buckets
            .write()
            .map_err(|e| TsdbError::Lock(e.to_string()))?;

        let tenants = buckets.entry(bucket.to_string()).or_default();
        let path = file.path();
        if tenants.values().flatten().any(|f| f.is_at(&path)) {
            return Err(TsdbError::DuplicateIndex(path.display().to_string()));
        }

        tracing::debug!(bucket, tenant, path = %path.display(), "registered index");
        tenants.entry(tenant.to_string()).or_default().push(file);
        Ok(())
    }
}
