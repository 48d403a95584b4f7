//! Error taxonomy (§7).
//!
//! Each subsystem owns a `#[non_exhaustive]` error enum, shaped like the
//! corpus's `StorageError` (`storage/sqlite.rs`): a `Database`/`Io` variant
//! with `#[from]`, plus domain-specific variants. `ZettelError` aggregates
//! them for callers that cross subsystem boundaries (the indexer touches
//! parser + resolver + store errors in a single call).

use thiserror::Error;

/// Store (C1) errors: integrity violations, migration failures. Fatal at operation scope.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("migration error: database schema version {db} is newer than code version {code}")]
    SchemaTooNew { db: u32, code: u32 },
    #[error("initialization error: {0}")]
    Init(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Parser (C2) errors: malformed preamble, unreadable file. Per-file; batch continues.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("io error reading {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("malformed preamble in {path}: {reason}")]
    MalformedPreamble { path: String, reason: String },
}

pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Graph engine (C5) errors: invalid traversal argument. Fatal at operation scope.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid traversal argument: {0}")]
    InvalidArgument(String),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Retrieval / embedding (C6, C9) errors: provider failure, missing model.
/// Callers gate these behind the circuit breaker and degrade to empty results.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("embedding provider error: {0}")]
    Provider(String),
    #[error("circuit open for subsystem: {0}")]
    CircuitOpen(String),
}

pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;

/// Suggestion engine (C7) errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid state transition: {0} -> {1}")]
    InvalidTransition(String, String),
}

pub type SuggestionResult<T> = std::result::Result<T, SuggestionError>;

/// Crate-level error aggregating all subsystem errors, for callers (e.g. the
/// indexer) that touch several subsystems in one operation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ZettelError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("suggestion error: {0}")]
    Suggestion(#[from] SuggestionError),
}

pub type ZettelResult<T> = std::result::Result<T, ZettelError>;
