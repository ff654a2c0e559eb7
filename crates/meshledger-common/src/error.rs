//! Common error types used throughout meshledger.
//!
//! This module provides a unified error type that covers the ledger's failure
//! cases: I/O, integrity problems, schema violations, lock contention, and
//! bad input.

/// Common error type for meshledger.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The ledger file could not be read, parsed, or written.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// An update referenced a column that is not part of the fixed schema.
    #[error("Unknown ledger column '{field}' (the ledger schema is fixed; refusing to add columns)")]
    UnknownField { field: String },

    /// Another process holds the single-writer lock on the ledger.
    #[error("Ledger is locked by another writer: {0}")]
    LedgerLocked(String),

    /// The requested item was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The external engine reported a failure.
    #[error("Engine error: {0}")]
    Engine(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new Ledger error.
    pub fn ledger<S: Into<String>>(msg: S) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a new UnknownField error.
    pub fn unknown_field<S: Into<String>>(field: S) -> Self {
        Self::UnknownField {
            field: field.into(),
        }
    }

    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Engine error.
    pub fn engine<S: Into<String>>(msg: S) -> Self {
        Self::Engine(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error threatens the ledger file itself.
    ///
    /// Per-item failures are absorbed by the stage runner; these are not.
    pub fn is_ledger_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Ledger(_) | Self::LedgerLocked(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
