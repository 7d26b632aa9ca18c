use thiserror::Error;

/// Error taxonomy surfaced by the routing core. Protocol servers map these
/// onto their own wire-level status codes (RTSP 401/404, HTTP statuses, or a
/// plain connection close).
#[derive(Debug, Error)]
pub enum PathError {
    #[error("invalid path name: {0}")]
    InvalidPathName(String),

    #[error("path not found")]
    PathNotFound,

    #[error("path already exists")]
    PathAlreadyExists,

    /// Credentials are required but missing. Reportable to the client so it
    /// can retry with a challenge response.
    #[error("authentication required")]
    AuthFailureSoft,

    /// Wrong credentials or blocked IP. The message is fixed on purpose: it
    /// must not reveal whether the path exists or which check failed.
    #[error("authentication failed")]
    AuthFailureHard,

    #[error("no one is publishing to this path")]
    NoOnePublishing,

    #[error("source start timed out")]
    SourceTimeout,

    #[error("another publisher is already connected")]
    PublisherConflict,

    #[error("too many readers")]
    TooManyReaders,

    #[error("terminated")]
    Terminated,

    #[error("bad format: {0}")]
    BadFormat(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PathError {
    pub fn invalid_operation<T: ToString>(t: T) -> Self {
        PathError::InvalidOperation(t.to_string())
    }

    pub fn bad_format<T: ToString>(t: T) -> Self {
        PathError::BadFormat(t.to_string())
    }

    /// True for the auth variants that must be preceded by the fixed
    /// anti-brute-force pause before being returned to the caller.
    pub fn is_hard_auth_failure(&self) -> bool {
        matches!(self, PathError::AuthFailureHard)
    }
}
