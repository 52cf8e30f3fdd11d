//! Handles to index files on local disk

use crate::index::format::{read_header, read_index, IndexContents, IndexHeader};
use crate::index::identifier::PrefixedIdentifier;
use crate::storage::error::{TsdbError, TsdbResult};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// An index file handed to the publisher.
///
/// Construction only validates the header; the body is decoded on first
/// access to [`contents`](Self::contents) and cached.
#[derive(Debug, Clone)]
pub struct LoadedIndexFile {
    identifier: PrefixedIdentifier,
    read_only: bool,
    header: Option<IndexHeader>,
    contents: Arc<OnceLock<IndexContents>>,
}

impl LoadedIndexFile {
    /// Open an index file, validating its header against the identifier.
    ///
    /// `read_only` marks files recovered from disk rather than freshly built.
    pub fn open(identifier: PrefixedIdentifier, read_only: bool) -> TsdbResult<Self> {
        let path = identifier.path();
        let header = read_header(&path)?;

        let expected = identifier.id().checksum();
        if header.body_checksum != expected {
            return Err(TsdbError::Corruption(format!(
                "{}: checksum {:08x} does not match name ({:08x})",
                path.display(),
                header.body_checksum,
                expected
            )));
        }

        Ok(Self {
            identifier,
            read_only,
            header: Some(header),
            contents: Arc::new(OnceLock::new()),
        })
    }

    /// Reference to a file whose header could not be validated
    pub fn unverified(identifier: PrefixedIdentifier, read_only: bool) -> Self {
        Self {
            identifier,
            read_only,
            header: None,
            contents: Arc::new(OnceLock::new()),
        }
    }

    pub fn identifier(&self) -> &PrefixedIdentifier {
        &self.identifier
    }

    pub fn path(&self) -> PathBuf {
        self.identifier.path()
    }

    pub fn name(&self) -> String {
        self.identifier.name()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// False for handles created with [`unverified`](Self::unverified)
    pub fn is_verified(&self) -> bool {
        self.header.is_some()
    }

    /// `(from, through)` in Unix ms, when the header was read
    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.header.as_ref().map(|h| (h.from, h.through))
    }

    /// Decoded contents, read from disk on first use
    pub fn contents(&self) -> TsdbResult<&IndexContents> {
        if let Some(contents) = self.contents.get() {
            return Ok(contents);
        }
        let (_, contents) = read_index(self.identifier.path())?;
        let _ = self.contents.set(contents);
        self.contents
            .get()
            .ok_or_else(|| TsdbError::InvalidIndex("contents not loaded".into()))
    }

    /// Tenants with series in this file
    pub fn tenants(&self) -> TsdbResult<Vec<String>> {
        Ok(self
            .contents()?
            .tenants()
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// True if this handle points at `path`
    pub fn is_at(&self, path: &Path) -> bool {
        self.identifier.path() == path
    }
}
