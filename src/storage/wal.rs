//! Write-ahead log segments
//!
//! Each segment holds the series and chunk records a head accumulated while it
//! was active. Segments are named after the second they were opened at:
//! `<root>/wal/<unix-seconds>.wal`.
//!
//! Format per entry:
//! - length: u32 (4 bytes)
//! - data: [u8; length] (bincode `WalRecord`)
//! - crc: u32 (4 bytes, CRC32 of length + data)

use crate::storage::error::{TsdbError, TsdbResult};
use crate::storage::types::{ChunkMeta, Labels};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Largest accepted frame
const MAX_ENTRY_SIZE: usize = 16 * 1024 * 1024;

const WAL_EXTENSION: &str = "wal";

/// Directory holding WAL segments under a manager root
pub fn wal_dir(root: &Path) -> PathBuf {
    root.join("wal")
}

/// Reference to one WAL segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalIdentifier {
    ts: DateTime<Utc>,
}

impl WalIdentifier {
    /// Identifier for a segment opened at `ts` (truncated to seconds)
    pub fn new(ts: DateTime<Utc>) -> Self {
        let ts = Utc
            .timestamp_opt(ts.timestamp(), 0)
            .single()
            .unwrap_or(ts);
        Self { ts }
    }

    pub fn ts(&self) -> DateTime<Utc> {
        self.ts
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.ts.timestamp(), WAL_EXTENSION)
    }

    /// Path of this segment under a manager root
    pub fn path(&self, root: &Path) -> PathBuf {
        wal_dir(root).join(self.file_name())
    }

    /// Parse a segment file name such as `1700000000.wal`
    pub fn parse(name: &str) -> Option<Self> {
        let secs = name.strip_suffix(".wal")?;
        if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let secs: i64 = secs.parse().ok()?;
        Utc.timestamp_opt(secs, 0).single().map(|ts| Self { ts })
    }
}

impl fmt::Display for WalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ts.timestamp())
    }
}

/// List all parseable segments under a manager root, oldest first.
///
/// A missing WAL directory yields an empty list.
pub fn list_wals(root: &Path) -> TsdbResult<Vec<WalIdentifier>> {
    let dir = wal_dir(root);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(WalIdentifier::parse) {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Delete consumed segments. Already missing segments are ignored.
pub fn remove_wals(root: &Path, ids: &[WalIdentifier]) -> TsdbResult<()> {
    for id in ids {
        match std::fs::remove_file(id.path(root)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// One record in a WAL segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// Declares a series and the ref later chunk records use for it
    Series {
        tenant: String,
        series_ref: u64,
        labels: Labels,
    },
    /// Chunks flushed for a previously declared series
    Chunks {
        tenant: String,
        series_ref: u64,
        chunks: Vec<ChunkMeta>,
    },
}

/// Sync strategy for WAL writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalSyncMode {
    /// Fsync after every write
    EveryWrite,
    /// Fsync once enough bytes accumulated
    #[default]
    Batched,
    /// No fsync, rely on OS
    None,
}

/// Appends records to a single WAL segment
pub struct WalWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    entry_count: u64,
    bytes_since_sync: usize,
    sync_mode: WalSyncMode,
    sync_threshold: usize,
}

impl WalWriter {
    /// Open (or create) the segment for `id` under a manager root
    pub fn create(root: &Path, id: WalIdentifier, sync_mode: WalSyncMode) -> TsdbResult<Self> {
        Self::open(id.path(root), sync_mode)
    }

    /// Open or create a segment file
    pub fn open(path: impl AsRef<Path>, sync_mode: WalSyncMode) -> TsdbResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let entry_count = WalReader::open(&path)?.take_while(|r| r.is_ok()).count() as u64;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            entry_count,
            bytes_since_sync: 0,
            sync_mode,
            sync_threshold: 64 * 1024,
        })
    }

    /// Append a record
    pub fn append(&mut self, record: &WalRecord) -> TsdbResult<()> {
        self.write_frame(record)?;
        self.maybe_sync()
    }

    /// Append several records, syncing at most once
    pub fn append_batch(&mut self, records: &[WalRecord]) -> TsdbResult<()> {
        for record in records {
            self.write_frame(record)?;
        }
        self.maybe_sync()
    }

    fn write_frame(&mut self, record: &WalRecord) -> TsdbResult<()> {
        let data = bincode::serialize(record)?;
        if data.len() > MAX_ENTRY_SIZE {
            return Err(TsdbError::Wal(format!(
                "Entry length too large: {}",
                data.len()
            )));
        }
        let len = (data.len() as u32).to_le_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len);
        hasher.update(&data);
        let crc = hasher.finalize();

        self.writer.write_all(&len)?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&crc.to_le_bytes())?;

        self.entry_count += 1;
        self.bytes_since_sync += 8 + data.len();
        Ok(())
    }

    fn maybe_sync(&mut self) -> TsdbResult<()> {
        match self.sync_mode {
            WalSyncMode::EveryWrite => self.sync()?,
            WalSyncMode::Batched => {
                if self.bytes_since_sync >= self.sync_threshold {
                    self.sync()?;
                }
            }
            WalSyncMode::None => self.writer.flush()?,
        }
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> TsdbResult<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.bytes_since_sync = 0;
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Streaming reader over the frames of one segment
pub struct WalReader {
    reader: BufReader<File>,
    entries_read: u64,
}

impl WalReader {
    pub fn open(path: impl AsRef<Path>) -> TsdbResult<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(file),
            entries_read: 0,
        })
    }

    pub fn entries_read(&self) -> u64 {
        self.entries_read
    }

    fn read_entry<R: Read>(reader: &mut R) -> TsdbResult<Option<WalRecord>> {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_ENTRY_SIZE {
            return Err(TsdbError::Wal(format!("Entry length too large: {}", len)));
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf)?;
        let stored_crc = u32::from_le_bytes(crc_buf);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&len_buf);
        hasher.update(&data);
        let computed_crc = hasher.finalize();

        if stored_crc != computed_crc {
            return Err(TsdbError::Corruption(format!(
                "CRC mismatch: stored={}, computed={}",
                stored_crc, computed_crc
            )));
        }

        Ok(Some(bincode::deserialize(&data)?))
    }
}

impl Iterator for WalReader {
    type Item = TsdbResult<WalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match Self::read_entry(&mut self.reader) {
            Ok(Some(record)) => {
                self.entries_read += 1;
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Read every intact record of a segment.
///
/// Reading stops at the first corrupt or torn frame; the records before it
/// are returned.
pub fn read_segment(path: impl AsRef<Path>) -> TsdbResult<Vec<WalRecord>> {
    let path = path.as_ref();
    let mut records = Vec::new();
    for record in WalReader::open(path)? {
        match record {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    entry = records.len(),
                    "WAL replay stopped at corrupt entry: {}",
                    e
                );
                break;
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};
    use tempfile::tempdir;

    fn series(series_ref: u64) -> WalRecord {
        WalRecord::Series {
            tenant: "tenant-a".to_string(),
            series_ref,
            labels: Labels::from_pairs([("app", "api")]),
        }
    }

    fn chunks(series_ref: u64, from: i64) -> WalRecord {
        WalRecord::Chunks {
            tenant: "tenant-a".to_string(),
            series_ref,
            chunks: vec![ChunkMeta::new(from, from + 1000, 7)],
        }
    }

    #[test]
    fn test_identifier_naming() {
        let id = WalIdentifier::new(Utc.timestamp_opt(1_700_000_000, 500).unwrap());
        assert_eq!(id.file_name(), "1700000000.wal");
        assert_eq!(WalIdentifier::parse("1700000000.wal"), Some(id));
        assert_eq!(
            id.path(Path::new("/data")),
            PathBuf::from("/data/wal/1700000000.wal")
        );

        assert!(WalIdentifier::parse("1700000000").is_none());
        assert!(WalIdentifier::parse("abc.wal").is_none());
        assert!(WalIdentifier::parse(".wal").is_none());
    }

    #[test]
    fn test_write_and_read_segment() {
        let dir = tempdir().unwrap();
        let id = WalIdentifier::new(Utc.timestamp_opt(1000, 0).unwrap());

        {
            let mut wal = WalWriter::create(dir.path(), id, WalSyncMode::EveryWrite).unwrap();
            wal.append(&series(1)).unwrap();
            wal.append(&chunks(1, 0)).unwrap();
            assert_eq!(wal.entry_count(), 2);
        }

        let records = read_segment(id.path(dir.path())).unwrap();
        assert_eq!(records, vec![series(1), chunks(1, 0)]);
    }

    #[test]
    fn test_reopen_counts_existing_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal").join("1.wal");

        {
            let mut wal = WalWriter::open(&path, WalSyncMode::Batched).unwrap();
            wal.append_batch(&[series(1), chunks(1, 0), chunks(1, 1000)])
                .unwrap();
            wal.sync().unwrap();
        }

        let wal = WalWriter::open(&path, WalSyncMode::Batched).unwrap();
        assert_eq!(wal.entry_count(), 3);
    }

    #[test]
    fn test_corruption_stops_replay() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1.wal");

        {
            let mut wal = WalWriter::open(&path, WalSyncMode::EveryWrite).unwrap();
            wal.append(&series(1)).unwrap();
        }
        let first_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut wal = WalWriter::open(&path, WalSyncMode::EveryWrite).unwrap();
            wal.append(&chunks(1, 0)).unwrap();
        }

        // Flip bytes inside the second frame's payload
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(first_len + 6)).unwrap();
            file.write_all(&[0xFF, 0xFF]).unwrap();
        }

        let records = read_segment(&path).unwrap();
        assert_eq!(records, vec![series(1)]);

        let mut reader = WalReader::open(&path).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(reader.next().unwrap().is_err());
    }

    #[test]
    fn test_list_and_remove_wals() {
        let dir = tempdir().unwrap();
        assert!(list_wals(dir.path()).unwrap().is_empty());

        let ids: Vec<WalIdentifier> = [300, 100, 200]
            .iter()
            .map(|s| WalIdentifier::new(Utc.timestamp_opt(*s, 0).unwrap()))
            .collect();
        for id in &ids {
            WalWriter::create(dir.path(), *id, WalSyncMode::None).unwrap();
        }
        std::fs::write(wal_dir(dir.path()).join("notes.txt"), b"ignored").unwrap();

        let listed = list_wals(dir.path()).unwrap();
        let secs: Vec<i64> = listed.iter().map(|id| id.ts().timestamp()).collect();
        assert_eq!(secs, vec![100, 200, 300]);

        remove_wals(dir.path(), &listed[..2]).unwrap();
        // Removing again is not an error
        remove_wals(dir.path(), &listed[..2]).unwrap();

        let remaining = list_wals(dir.path()).unwrap();
        assert_eq!(remaining, vec![listed[2]]);
    }
}
