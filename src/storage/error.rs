//! Error types for the TSDB manager
//!
//! Every fallible operation in the crate returns [`TsdbResult`]. Build passes
//! use [`BuildFailure`] instead so callers learn which periods were already
//! registered before the error.

use thiserror::Error;

/// Errors that can occur while recovering, building or registering indices
#[derive(Error, Debug)]
pub enum TsdbError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// WAL format or replay error
    #[error("WAL error: {0}")]
    Wal(String),

    /// No table range covers the given table number
    #[error("could not find config for table number {0}")]
    MissingTableConfig(i64),

    /// Index file is missing or malformed
    #[error("Invalid index file: {0}")]
    InvalidIndex(String),

    /// The same index file was registered twice
    #[error("Index already registered: {0}")]
    DuplicateIndex(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),

    /// An error wrapped with a short static description
    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<TsdbError>,
    },
}

impl TsdbError {
    /// Wrap this error with a short description of the failed operation
    pub fn context(self, context: &'static str) -> Self {
        TsdbError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Strip any context wrappers
    pub fn root_cause(&self) -> &TsdbError {
        match self {
            TsdbError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<bincode::Error> for TsdbError {
    fn from(err: bincode::Error) -> Self {
        TsdbError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for TsdbError {
    fn from(err: serde_json::Error) -> Self {
        TsdbError::Serialization(err.to_string())
    }
}

/// Result type alias for manager operations
pub type TsdbResult<T> = Result<T, TsdbError>;

/// A build pass that stopped part way through.
///
/// Builds are not atomic across table periods: `registered` lists the bucket
/// keys whose index files were built and handed to the publisher before
/// `source` occurred. Those files stay on disk.
#[derive(Error, Debug)]
#[error("{source} ({} period(s) already registered)", .registered.len())]
pub struct BuildFailure {
    /// Bucket keys registered in this pass before the failure
    pub registered: Vec<String>,
    /// The error that aborted the pass
    #[source]
    pub source: TsdbError,
}

impl BuildFailure {
    pub fn new(source: TsdbError, registered: Vec<String>) -> Self {
        Self { registered, source }
    }
}
