//! Error types for the ncpass cache
//!
//! Domain errors are `thiserror` enums, one per concern, with a top-level
//! [`CacheError`] that converts from each of them.

use thiserror::Error;

/// Top-level cache error
#[derive(Debug, Error)]
pub enum CacheError {
    /// Document/patch errors
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    /// Remote transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pull/push reconciliation errors
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Errors raised while reading or patching a document
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    /// Field is not (yet) known
    #[error("Field '{0}' is missing")]
    MissingField(String),

    /// Patch operation references a path that does not exist
    #[error("Invalid patch: {op} at '{path}': {detail}")]
    InvalidPatch {
        /// Operation name (`add`, `replace`, `remove`)
        op: &'static str,
        /// Offending path
        path: String,
        /// Description of the failure
        detail: String,
    },

    /// Value used as a document is not a JSON object
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(String),
}

/// Convenience result alias for document operations
pub type DocumentResult<T> = std::result::Result<T, DocumentError>;

/// Failures of a single remote call.
///
/// A call that completes with a well-formed document lacking the expected
/// fields is *not* a transport error; that case surfaces as a [`SyncError`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never produced a response (DNS, TLS, timeout, reset)
    #[error("network failure: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("server rejected request with status {status}: {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The response body could not be decoded as JSON
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Returns true for failures worth retrying on the next `sync()`.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Network(_) => true,
            TransportError::Rejected { status, .. } => *status == 429 || *status >= 500,
            TransportError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            TransportError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            TransportError::Rejected {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Convenience result alias for gateway calls
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Reconciliation errors reported by pull, push, create and delete
#[derive(Debug, Error)]
pub enum SyncError {
    /// Response `id` does not match the entity the request was for
    #[error("identity mismatch: expected '{expected}', server answered '{actual}'")]
    IdentityMismatch {
        /// Identity the request was made for
        expected: String,
        /// Identity found in the response (empty when absent)
        actual: String,
    },

    /// Response carries no `revision`
    #[error("response for '{0}' carries no revision")]
    MissingRevision(String),

    /// Operation needs a server-assigned identity that does not exist yet
    #[error("entity has not been created on the server yet")]
    NotCreated,

    /// Entity was deleted on the server
    #[error("entity '{0}' has been deleted")]
    Deleted(String),

    /// A pending local patch and a remote change touch the same fields
    #[error("revision conflict on {paths:?}: local '{local_revision}', remote '{remote_revision}'")]
    RevisionConflict {
        /// Overlapping field paths
        paths: Vec<String>,
        /// Revision the local patches were computed against
        local_revision: String,
        /// Revision observed on the server
        remote_revision: String,
    },

    /// Remote call could not complete
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// Response could not be interpreted as a document
    #[error("document error: {0}")]
    Document(#[from] DocumentError),
}

impl SyncError {
    /// Returns true if the failure leaves state untouched and a later
    /// `sync()` may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(err) => err.is_retryable(),
            SyncError::IdentityMismatch { .. } | SyncError::MissingRevision(_) => true,
            _ => false,
        }
    }
}

/// Convenience result alias for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Result type using CacheError
pub type Result<T> = std::result::Result<T, CacheError>;
