use std::io;

/// Unified error type for the storage engine.
///
/// Page-full, merge collisions and backpressure are not errors: they are
/// handled inside the component that hits them. Everything below aborts the
/// request that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error from disk operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Stored data is damaged (CRC mismatch, bad signature, short page, etc).
    #[error("Corruption: {0}")]
    Corruption(String),
    /// Input violates the slice ordering/record rules. Not retryable.
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// Caller passed an argument outside the configured bounds.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Operation not allowed in the object's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// The log has been shut down.
    #[error("Log is shut down")]
    Shutdown,
}

impl Error {
    /// True for errors caused by the request's own data rather than storage.
    pub fn is_invalid_data(&self) -> bool {
        matches!(self, Error::InvalidData(_))
    }

    /// True for errors that mean a slice or page on disk can't be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }
}

/// Result type alias used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;
