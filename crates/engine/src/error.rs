//! Upload error types.

use upwell_store::StoreError;

/// Errors produced by the upload engine.
///
/// Exactly one of these reaches the consumer per session. Retryable
/// conditions (404, 5xx within budget) are handled internally and never
/// surface directly; the only trace of them is the response notification
/// stream.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("missing bucket or object name")]
    InvalidTarget,

    #[error("authorization failed: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("retry limit exceeded")]
    RetryLimitExceeded,

    #[error("upload failed with status {status}")]
    Failed { status: u16 },

    #[error("initiation response carried no session uri")]
    MissingSessionUri,

    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error("cancelled")]
    Cancelled,

    #[error("upload session is closed")]
    Closed,

    #[error("internal error: {0}")]
    Internal(String),
}
