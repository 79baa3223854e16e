//! Error types for the scout library.
//!
//! Only [`ScoutError`] ever escapes a discovery run. Fetch, page and probe
//! failures are absorbed into [`Diagnostic`](crate::Diagnostic)s by the stage
//! that observed them.

use std::time::Duration;

use thiserror::Error;

/// Errors that are fatal to the current run and surfaced to the caller.
///
/// The previously persisted registry stays valid and usable whenever one of
/// these is returned.
#[derive(Debug, Error)]
pub enum ScoutError {
    /// The generator bounds would enumerate more candidates than allowed.
    #[error("generator bounds produce {size} candidates, limit is {limit}")]
    BoundsExceeded {
        /// Size of the Cartesian product the bounds describe.
        size: u128,
        /// Configured upper limit.
        limit: u64,
    },

    /// The generator bounds are malformed (empty dimension, duplicates, bad day).
    #[error("invalid generator bounds: {0}")]
    InvalidBounds(String),

    /// The persisted registry was written with a different schema version.
    #[error("registry schema version {found} does not match expected {expected}")]
    SchemaMismatch {
        /// Version found on disk.
        found: u32,
        /// Version this build understands.
        expected: u32,
    },

    /// An extraction rule pattern failed to compile.
    #[error("extraction rule '{name}' is invalid: {source}")]
    InvalidRule {
        /// Rule name.
        name: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// Registry persistence failed.
    #[error("registry store error: {0}")]
    Store(StoreError),

    /// A configuration value could not be used.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised by the persisted registry store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to read or write the registry file.
    #[error("registry io failed: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file is not valid JSON for the expected shape.
    #[error("failed to parse registry: {0}")]
    Parse(#[from] serde_json::Error),

    /// Failed to acquire a file lock.
    #[error("failed to acquire registry lock")]
    Lock,

    /// The file was written by an incompatible schema version.
    #[error("registry schema version {found} does not match expected {expected}")]
    SchemaMismatch {
        /// Version found on disk.
        found: u32,
        /// Version this build understands.
        expected: u32,
    },

    /// The store refused a write because it was opened fail-closed.
    #[error("registry store is read-only after a schema mismatch; run a reset first")]
    FailClosed,
}

/// A page could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The fetch did not complete within its timeout.
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error("HTTP status {status}")]
    Http {
        /// Status code returned by the server.
        status: u16,
    },

    /// The response body exceeded the size limit.
    #[error("response too large: {0} bytes")]
    TooLarge(usize),

    /// Connection-level failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// A fetched page could not be parsed into text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PageError {
    /// The page body was empty or whitespace only.
    #[error("page is empty")]
    Empty,

    /// The page body looks like binary content.
    #[error("page content is not text")]
    Binary,

    /// The page body exceeded the parse limit.
    #[error("page too large to parse: {0} bytes")]
    TooLarge(usize),
}

/// A probe round trip failed before any status was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The probe did not complete within its timeout.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("probe transport failure: {0}")]
    Transport(String),
}

impl From<StoreError> for ScoutError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SchemaMismatch { found, expected } => {
                ScoutError::SchemaMismatch { found, expected }
            }
            other => ScoutError::Store(other),
        }
    }
}
