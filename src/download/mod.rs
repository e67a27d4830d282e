//! Batch saving of portal files.
//!
//! [`DownloadEngine`] saves many [`RemoteFile`](crate::RemoteFile)s at once
//! with a bounded number of concurrent saves, retrying transient failures
//! according to a [`RetryPolicy`].

mod engine;
mod retry;

pub use engine::{ByteProgress, DEFAULT_CONCURRENCY, DownloadEngine, EngineError, SaveStats};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, GiveUp, RetryDecision, RetryPolicy, classify_error,
};
