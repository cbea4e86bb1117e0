//! Error taxonomy shared by the store family and the tree models.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Common error type for stores and models.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An object with the same identity already exists in the store.
    #[error("object with id [{0}] already exists")]
    DuplicateIdentity(String),

    /// The object does not exist, locally or (for remote stores) after
    /// resynchronization was exhausted.
    #[error("object [{0}] not found")]
    NotFound(String),

    /// The server envelope was malformed, empty, or otherwise unusable.
    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    /// A caller passed an argument of the wrong shape or type.
    #[error("invalid argument: {0}")]
    InvalidType(String),

    /// The object itself is not usable (for example it has no identity).
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// A load request is already pending on this store instance.
    #[error("a load request is already pending")]
    LoadPending,

    /// A write was attempted on a read-only attribute or a store that does
    /// not permit the operation.
    #[error("access denied: {0}")]
    Access(String),

    /// The operation was cancelled because the store was closed while the
    /// request was in flight or queued.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Transport-level failure with a normalized HTTP status.
    #[error("network error: status {status}: {message}")]
    Network { status: u16, message: String },

    /// The store is out of sync with the remote backend beyond recovery
    /// (the root itself is gone, or no parent was left to climb to).
    #[error("store corrupt: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl StoreError {
    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Network { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for the stale-reference statuses (404/410) that trigger a
    /// remote-store resync rather than a hard failure.
    pub fn is_stale_reference(&self) -> bool {
        matches!(self.status(), Some(404) | Some(410))
    }
}
