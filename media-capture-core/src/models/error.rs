use thiserror::Error;

/// Error category reported upward through `CaptureDelegate::on_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoError,
    /// Element or plugin creation failed, or a device/output could not be opened.
    ResourceError,
    /// Codec or container not supported, or the stream could not be parsed.
    FormatError,
    /// DRM or decryption key errors.
    AccessDeniedError,
    /// The pipeline failed to reach a requested state.
    StateChangeFailure,
    OutOfSpaceError,
    /// An operation was issued while the session could not serve it.
    NotReadyError,
}

/// Errors that can occur while building or driving a capture pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("missing element factory: {0}")]
    MissingElement(String),

    #[error("failed to link {0} to {1}")]
    LinkFailed(String, String),

    #[error("state change failed: {0}")]
    StateChangeFailed(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("unsupported ambisonic level: {0}")]
    UnsupportedAmbisonicLevel(u32),

    #[error("timeout")]
    Timeout,

    #[error("session closed")]
    SessionClosed,
}

impl CaptureError {
    /// Category used when the error is surfaced to clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingElement(_)
            | Self::LinkFailed(..)
            | Self::Resource(_)
            | Self::ConfigurationFailed(_)
            | Self::Timeout
            | Self::SessionClosed => ErrorCode::ResourceError,
            Self::StateChangeFailed(_) => ErrorCode::StateChangeFailure,
            Self::UnsupportedFormat(_) | Self::UnsupportedAmbisonicLevel(_) => ErrorCode::FormatError,
            Self::AccessDenied(_) => ErrorCode::AccessDeniedError,
            Self::StorageError(_) => ErrorCode::OutOfSpaceError,
            Self::NotReady(_) => ErrorCode::NotReadyError,
        }
    }
}
