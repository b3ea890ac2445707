//! Error types for the sync engine and cache.

/// Sync engine errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The background consolidation worker is gone.
    #[error("consolidation queue closed")]
    ConsolidationClosed,

    /// Cache snapshot could not be read or written.
    #[error("cache error: {message}")]
    Cache { message: String },
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A redirect template whose escaping could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid redirect template at byte {position}: {reason}")]
pub struct DecodeError {
    pub position: usize,
    pub reason: &'static str,
}
