//! WAL-side storage: the data recovered before it is indexed
//!
//! - **types**: Labels, fingerprints and chunk metadata
//! - **wal**: WAL segment naming, writer and reader
//! - **head**: Replaying segments into per-tenant heads
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Ingest:   series/chunk records → WalWriter → wal/<unix>.wal
//!
//! Recovery: wal/<unix>.wal... → WalHeadRecovery → TenantHeads::for_all
//! ```

pub mod error;
pub mod head;
pub mod types;
pub mod wal;

pub use error::{BuildFailure, TsdbError, TsdbResult};
pub use head::{HeadRecovery, RecoveredHeads, SeriesVisitor, TenantHeads, WalHeadRecovery};
pub use types::{ChunkMeta, Fingerprint, Label, Labels, TENANT_LABEL};
pub use wal::{
    list_wals, read_segment, remove_wals, wal_dir, WalIdentifier, WalReader, WalRecord,
    WalSyncMode, WalWriter,
};
