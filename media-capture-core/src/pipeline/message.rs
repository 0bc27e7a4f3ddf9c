use std::path::PathBuf;
use std::time::Duration;

use crate::models::error::ErrorCode;
use crate::models::state::ElementState;

/// Error domain reported by a pipeline element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorDomain {
    Core(CoreErrorKind),
    Library,
    Resource(ResourceErrorKind),
    Stream(StreamErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreErrorKind {
    MissingPlugin,
    StateChange,
    Negotiation,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceErrorKind {
    NotFound,
    Busy,
    OpenRead,
    OpenWrite,
    NoSpaceLeft,
    NotAuthorized,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    Format,
    Demux,
    Decode,
    WrongType,
    TypeNotFound,
    CodecNotFound,
    Decrypt,
    DecryptNoKey,
    Failed,
    Other,
}

impl ErrorDomain {
    /// Maps a native error onto the client-facing category.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Stream(StreamErrorKind::Decrypt | StreamErrorKind::DecryptNoKey) => {
                ErrorCode::AccessDeniedError
            }
            Self::Stream(
                StreamErrorKind::Format
                | StreamErrorKind::Demux
                | StreamErrorKind::Decode
                | StreamErrorKind::WrongType
                | StreamErrorKind::TypeNotFound
                | StreamErrorKind::CodecNotFound,
            ) => ErrorCode::FormatError,
            Self::Core(CoreErrorKind::MissingPlugin) => ErrorCode::FormatError,
            _ => ErrorCode::ResourceError,
        }
    }
}

/// Message posted on the pipeline bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    StateChanged {
        source: String,
        old: ElementState,
        new: ElementState,
        pending: ElementState,
    },
    Eos {
        source: String,
    },
    Error {
        source: String,
        domain: ErrorDomain,
        message: String,
        debug: Option<String>,
    },
    Warning {
        source: String,
        message: String,
    },
    Info {
        source: String,
        message: String,
    },
    DurationChanged {
        source: String,
        duration: Option<Duration>,
    },
    ImageExposed {
        request_id: i32,
    },
    ImageCaptured {
        request_id: i32,
    },
    ImageSaved {
        request_id: i32,
        path: PathBuf,
    },
}

impl BusMessage {
    /// Name of the element that posted the message, if any.
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::StateChanged { source, .. }
            | Self::Eos { source }
            | Self::Error { source, .. }
            | Self::Warning { source, .. }
            | Self::Info { source, .. }
            | Self::DurationChanged { source, .. } => Some(source),
            Self::ImageExposed { .. } | Self::ImageCaptured { .. } | Self::ImageSaved { .. } => {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrypt_errors_deny_access() {
        assert_eq!(
            ErrorDomain::Stream(StreamErrorKind::Decrypt).error_code(),
            ErrorCode::AccessDeniedError
        );
        assert_eq!(
            ErrorDomain::Stream(StreamErrorKind::DecryptNoKey).error_code(),
            ErrorCode::AccessDeniedError
        );
    }

    #[test]
    fn stream_parsing_errors_are_format_errors() {
        for kind in [
            StreamErrorKind::Format,
            StreamErrorKind::Demux,
            StreamErrorKind::Decode,
            StreamErrorKind::WrongType,
            StreamErrorKind::TypeNotFound,
            StreamErrorKind::CodecNotFound,
        ] {
            assert_eq!(ErrorDomain::Stream(kind).error_code(), ErrorCode::FormatError);
        }
        assert_eq!(
            ErrorDomain::Core(CoreErrorKind::MissingPlugin).error_code(),
            ErrorCode::FormatError
        );
    }

    #[test]
    fn everything_else_is_a_resource_error() {
        assert_eq!(
            ErrorDomain::Resource(ResourceErrorKind::OpenWrite).error_code(),
            ErrorCode::ResourceError
        );
        assert_eq!(ErrorDomain::Library.error_code(), ErrorCode::ResourceError);
        assert_eq!(
            ErrorDomain::Stream(StreamErrorKind::Failed).error_code(),
            ErrorCode::ResourceError
        );
        assert_eq!(
            ErrorDomain::Core(CoreErrorKind::StateChange).error_code(),
            ErrorCode::ResourceError
        );
    }
}
