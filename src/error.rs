//! Engine-wide error type.
//!
//! Mirrors the flat, enum-per-failure-mode style used across the rest of
//! this crate's lineage (`InvalidFile`, `KeyNotFound`, `IoError`, ...)
//! rather than a boxed `dyn Error` or per-module error type.

use std::{fmt, io, result};

/// Result alias used throughout the engine.
pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// ADD of an already-present value, REMOVE of an absent one, or a
    /// revision whose (L,K,V) type triple does not match its block's
    /// schema.
    InvariantViolation(String),
    /// Optimistic transaction validation found a conflicting commit.
    TransactionConflict(String),
    /// A blocking wait (lock acquisition, fsync, pool join) exceeded its
    /// budget.
    Timeout(String),
    /// Operation was explicitly aborted before completion.
    Cancelled,
    /// Passed straight through from the RPC layer; the engine never
    /// constructs this variant itself.
    Auth(String),
    /// A block or buffer page is unreadable and has been quarantined.
    Corruption(String),
    /// Malformed on-disk file name or layout.
    InvalidFile(String),
    /// Engine configuration is invalid (e.g. nested buffer/database dirs).
    InvalidConfig(String),
    KeyNotFound(String),
    NotFound(String),
    ThreadFail(String),
    IoError(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvariantViolation(s) => write!(f, "invariant violation: {}", s),
            Error::TransactionConflict(s) => write!(f, "transaction conflict: {}", s),
            Error::Timeout(s) => write!(f, "timeout: {}", s),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Auth(s) => write!(f, "auth error: {}", s),
            Error::Corruption(s) => write!(f, "corruption: {}", s),
            Error::InvalidFile(s) => write!(f, "invalid file: {}", s),
            Error::InvalidConfig(s) => write!(f, "invalid config: {}", s),
            Error::KeyNotFound(s) => write!(f, "key not found: {}", s),
            Error::NotFound(s) => write!(f, "not found: {}", s),
            Error::ThreadFail(s) => write!(f, "thread failure: {}", s),
            Error::IoError(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        format!("{:?}", self) == format!("{:?}", other)
    }
}
