//! Crate-wide error type. API calls return `Result<_, MeshlinkError>`;
//! background task failures never panic or abort the endpoint — they
//! surface through the `error` event instead (see `Endpoint::on_error`).

/// The error kinds an endpoint can return.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MeshlinkError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    /// Kept for parity with the source library; Rust's global allocator
    /// aborts the process on allocation failure rather than returning a
    /// recoverable error, so this variant is never constructed by this
    /// crate.
    #[error("out of memory")]
    OutOfMemory,
}

impl From<meshlink_protocol::FrameError> for MeshlinkError {
    fn from(e: meshlink_protocol::FrameError) -> Self {
        MeshlinkError::MalformedFrame(e.to_string())
    }
}

impl From<std::io::Error> for MeshlinkError {
    fn from(e: std::io::Error) -> Self {
        MeshlinkError::NetworkError(e.to_string())
    }
}
