//! On-disk index file format
//!
//! Layout:
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ HEADER (64 bytes)                       │
//! │   magic: [u8; 4] = "TSDX"               │
//! │   version: u16                          │
//! │   from: i64                             │
//! │   through: i64                          │
//! │   series_count: u32                     │
//! │   body_len: u64                         │
//! │   body_checksum: u32                    │
//! │   reserved: [u8; 22]                    │
//! │   header_checksum: u32                  │
//! ├─────────────────────────────────────────┤
//! │ BODY                                    │
//! │   lz4(bincode(IndexContents))           │
//! └─────────────────────────────────────────┘
//! ```
//!
//! `body_checksum` is the CRC32 of the body and is also the checksum encoded
//! in the index file name.

use crate::storage::error::{TsdbError, TsdbResult};
use crate::storage::types::{ChunkMeta, Fingerprint, Labels, TENANT_LABEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Magic bytes for index file identification
const INDEX_MAGIC: [u8; 4] = *b"TSDX";

/// Current index format version
const INDEX_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// One series stored in an index file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedSeries {
    /// Labels including the synthetic tenant label
    pub labels: Labels,
    /// Fingerprint of the labels without the tenant label
    pub fingerprint: Fingerprint,
    pub chunks: Vec<ChunkMeta>,
}

/// Decoded body of an index file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexContents {
    pub series: Vec<IndexedSeries>,
}

impl IndexContents {
    /// Tenants present in this index, from the embedded tenant label
    pub fn tenants(&self) -> BTreeSet<&str> {
        self.series
            .iter()
            .filter_map(|s| s.labels.get(TENANT_LABEL))
            .collect()
    }

    /// Series belonging to one tenant
    pub fn series_for_tenant<'a>(
        &'a self,
        tenant: &'a str,
    ) -> impl Iterator<Item = &'a IndexedSeries> + 'a {
        self.series
            .iter()
            .filter(move |s| s.labels.get(TENANT_LABEL) == Some(tenant))
    }
}

/// Index file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub version: u16,
    /// Earliest chunk start, Unix ms
    pub from: i64,
    /// Latest chunk end, Unix ms
    pub through: i64,
    pub series_count: u32,
    pub body_len: u64,
    pub body_checksum: u32,
}

impl IndexHeader {
    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0..4].copy_from_slice(&INDEX_MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..14].copy_from_slice(&self.from.to_le_bytes());
        buf[14..22].copy_from_slice(&self.through.to_le_bytes());
        buf[22..26].copy_from_slice(&self.series_count.to_le_bytes());
        buf[26..34].copy_from_slice(&self.body_len.to_le_bytes());
        buf[34..38].copy_from_slice(&self.body_checksum.to_le_bytes());
        // bytes 38-59 reserved

        let checksum = crc32fast::hash(&buf[0..60]);
        buf[60..64].copy_from_slice(&checksum.to_le_bytes());

        buf
    }

    /// Parse header from bytes
    pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> TsdbResult<Self> {
        let stored_checksum = u32::from_le_bytes([buf[60], buf[61], buf[62], buf[63]]);
        let computed_checksum = crc32fast::hash(&buf[0..60]);

        if stored_checksum != computed_checksum {
            return Err(TsdbError::Corruption(format!(
                "Header checksum mismatch: stored={}, computed={}",
                stored_checksum, computed_checksum
            )));
        }

        if buf[0..4] != INDEX_MAGIC {
            return Err(TsdbError::InvalidIndex(format!(
                "Invalid magic: {:?}",
                &buf[0..4]
            )));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > INDEX_VERSION {
            return Err(TsdbError::InvalidIndex(format!(
                "Unsupported version: {}",
                version
            )));
        }

        let bytes8 = |offset: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[offset..offset + 8]);
            b
        };
        let from = i64::from_le_bytes(bytes8(6));
        let through = i64::from_le_bytes(bytes8(14));
        let body_len = u64::from_le_bytes(bytes8(26));
        let series_count = u32::from_le_bytes([buf[22], buf[23], buf[24], buf[25]]);
        let body_checksum = u32::from_le_bytes([buf[34], buf[35], buf[36], buf[37]]);

        Ok(Self {
            version,
            from,
            through,
            series_count,
            body_len,
            body_checksum,
        })
    }
}

/// Encode contents into a header and compressed body
pub fn encode_index(
    from: i64,
    through: i64,
    contents: &IndexContents,
) -> TsdbResult<(IndexHeader, Vec<u8>)> {
    let raw = bincode::serialize(contents)?;
    let body = lz4_flex::compress_prepend_size(&raw);

    let header = IndexHeader {
        version: INDEX_VERSION,
        from,
        through,
        series_count: contents.series.len() as u32,
        body_len: body.len() as u64,
        body_checksum: crc32fast::hash(&body),
    };
    Ok((header, body))
}

/// Read and validate only the header of an index file
pub fn read_header(path: impl AsRef<Path>) -> TsdbResult<IndexHeader> {
    let path = path.as_ref();
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len < HEADER_SIZE as u64 {
        return Err(TsdbError::InvalidIndex(format!(
            "{} is too small to be an index file ({} bytes)",
            path.display(),
            len
        )));
    }

    let mut buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut buf)?;
    let header = IndexHeader::from_bytes(&buf)?;

    if len != HEADER_SIZE as u64 + header.body_len {
        return Err(TsdbError::Corruption(format!(
            "{}: expected {} body bytes, found {}",
            path.display(),
            header.body_len,
            len - HEADER_SIZE as u64
        )));
    }
    Ok(header)
}

/// Read, validate and decode a full index file
pub fn read_index(path: impl AsRef<Path>) -> TsdbResult<(IndexHeader, IndexContents)> {
    let path = path.as_ref();
    let header = read_header(path)?;

    let data = std::fs::read(path)?;
    let body = data
        .get(HEADER_SIZE..)
        .ok_or_else(|| TsdbError::InvalidIndex(format!("{} was truncated", path.display())))?;
    let checksum = crc32fast::hash(body);
    if checksum != header.body_checksum {
        return Err(TsdbError::Corruption(format!(
            "{}: body checksum mismatch: stored={:08x}, computed={:08x}",
            path.display(),
            header.body_checksum,
            checksum
        )));
    }

    let raw = lz4_flex::decompress_size_prepended(body)
        .map_err(|e| TsdbError::Corruption(format!("decompression failed: {}", e)))?;
    let contents: IndexContents = bincode::deserialize(&raw)?;
    Ok((header, contents))
}
