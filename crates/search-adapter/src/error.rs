//! Error types for the search adapter.
//!
//! Errors are split the same way callers need to react to them: transport
//! failures coming back from the search engine client, structured bulk
//! failures that report which documents were rejected, and local errors for
//! invalid queries or malformed responses.
//!
//! Lease release failures never show up here. They are logged where they
//! happen and the server-side keep-alive reclaims the lease.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// The primary error type for all adapter operations.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Transport or translation errors from the search engine client.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// One or more items in a bulk request failed.
    #[error(transparent)]
    BulkFailure(#[from] BulkFailure),

    /// The query cannot be executed as requested.
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// The cursor has already been released and cannot be advanced.
    #[error("cursor is closed")]
    CursorClosed,

    /// The bulk response does not line up with the bulk request.
    #[error("bulk response mismatch: {message} (expected {expected} items, got {actual})")]
    BulkResponseMismatch {
        expected: usize,
        actual: usize,
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Invalid client configuration.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },
}

/// Errors raised while talking to the search engine.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection to the engine could not be established.
    #[error("connection failed to {node}: {message}")]
    ConnectionFailed { node: String, message: String },

    /// The request could not be sent or the response could not be read.
    #[error("{operation} request failed: {message}")]
    RequestFailed {
        operation: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The engine answered with a non-success status code.
    #[error("{operation} returned status {status}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The engine answered, but the response is missing required fields.
    #[error("malformed {operation} response: {message}")]
    MalformedResponse {
        operation: &'static str,
        message: String,
    },
}

impl TransportError {
    /// Creates a malformed-response error for the given operation.
    pub fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        TransportError::MalformedResponse {
            operation,
            message: message.into(),
        }
    }
}

/// Failure detail for a single bulk item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    /// HTTP status reported for the item.
    pub status: u16,
    /// Engine error type (e.g. `version_conflict_engine_exception`).
    pub error_type: String,
    /// Human-readable reason.
    pub reason: String,
}

impl fmt::Display for BulkItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.error_type, self.reason)
    }
}

/// A bulk request in which at least one item failed.
///
/// The whole batch is reported as failed. Items that the engine did accept
/// are not rolled back; the map tells the caller which documents to retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "bulk request has failures: {failed} of {total} items failed ({ids})",
    ids = format_ids(.failures)
)]
pub struct BulkFailure {
    /// Failed document id to failure detail.
    ///
    /// When several failed items share an id, the last one is kept.
    pub failures: BTreeMap<String, BulkItemFailure>,
    /// Number of failed items, counting repeated ids once per item.
    pub failed: usize,
    /// Number of items in the batch.
    pub total: usize,
}

impl BulkFailure {
    /// Creates a failure report for a batch of `total` items, one per id.
    pub fn new(failures: BTreeMap<String, BulkItemFailure>, total: usize) -> Self {
        let failed = failures.len();
        Self::with_failed(failures, failed, total)
    }

    /// Creates a failure report where `failed` items failed, possibly more
    /// than there are distinct ids in `failures`.
    pub fn with_failed(
        failures: BTreeMap<String, BulkItemFailure>,
        failed: usize,
        total: usize,
    ) -> Self {
        let failed = failed.max(failures.len());
        Self {
            failures,
            failed,
            total,
        }
    }

    /// Returns the ids of the failed documents in sorted order.
    pub fn failed_ids(&self) -> impl Iterator<Item = &str> {
        self.failures.keys().map(String::as_str)
    }

    /// Returns the failure detail for a document id.
    pub fn failure(&self, id: &str) -> Option<&BulkItemFailure> {
        self.failures.get(id)
    }
}

fn format_ids(failures: &BTreeMap<String, BulkItemFailure>) -> String {
    failures.keys().cloned().collect::<Vec<_>>().join(", ")
}

/// Result type alias for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Serialization {
            message: err.to_string(),
        }
    }
}
