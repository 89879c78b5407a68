//! Shared error taxonomy for the storage/transport core

use crate::store::Revnum;

/// Result type for storage/transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding, parsing or loading versioned data
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Structurally invalid bytes: bad magic, header without a colon,
    /// out-of-bounds delta instruction, backwards-sliding source view, ...
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// The stream ended before a complete unit could be decoded. In
    /// streaming contexts this means "wait for more input"; at top-level
    /// end-of-stream it is fatal.
    #[error("incomplete data: {0}")]
    IncompleteData(String),

    /// Content did not match a declared digest. Always fatal, never retried.
    #[error("checksum mismatch on '{path}': expected {expected}, actual {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// The dump stream declares a format version this parser/consumer
    /// combination cannot honor.
    #[error("unsupported dumpfile version: {0}")]
    UnsupportedVersion(u32),

    /// A pre-commit hook rejected the transaction (which was aborted).
    #[error("hook '{hook}' rejected the operation: {message}")]
    HookFailed { hook: String, message: String },

    /// The commit succeeded but the post-commit hook failed afterwards.
    /// The named revision is durable; nothing was rolled back.
    #[error("commit of r{revision} succeeded, but post-commit hook failed: {message}")]
    PostCommitHookFailed { revision: Revnum, message: String },

    /// A copy-from or compare revision is not available in the target store.
    #[error("no such revision: r{0}")]
    NoSuchRevision(Revnum),

    /// A path does not exist in the revision or transaction being examined.
    #[error("path not found: '{0}'")]
    NotFound(String),

    /// The store rejected an operation (open transaction missing, commit
    /// conflict, and similar conditions surfaced by a backend).
    #[error("store error: {0}")]
    Store(String),

    /// The caller's cancellation callback asked to stop.
    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedData(msg.into())
    }

    pub(crate) fn incomplete(msg: impl Into<String>) -> Self {
        Error::IncompleteData(msg.into())
    }
}
