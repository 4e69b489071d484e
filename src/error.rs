//! Error taxonomy

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::types::TaskKind;

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by requests.
///
/// Every kind carries a structured reason so callers can branch on it
/// without inspecting messages. The type is cheap to clone because a single
/// error is shared between the request wrapper, the retrier and the final
/// response.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The request URL could not be parsed
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected input
        url: String,
    },

    /// A header name or value could not be used
    #[error("invalid header: {name}")]
    InvalidHeader {
        /// The offending header name
        name: String,
    },

    /// Parameters could not be encoded into the request
    #[error("parameter encoding failed: {0}")]
    ParameterEncodingFailed(ParameterEncodingFailureReason),

    /// A multipart body could not be assembled
    #[error("multipart encoding failed: {0}")]
    MultipartEncodingFailed(MultipartEncodingFailureReason),

    /// A validation rejected the response
    #[error("response validation failed: {0}")]
    ResponseValidationFailed(ResponseValidationFailureReason),

    /// The response body could not be turned into the requested value
    #[error("response serialization failed: {0}")]
    ResponseSerializationFailed(ResponseSerializationFailureReason),

    /// A request adapter refused to produce a request
    #[error("request adaptation failed: {0}")]
    RequestAdaptationFailed(Arc<dyn std::error::Error + Send + Sync>),

    /// The backend could not create a task
    #[error("task creation failed: {0}")]
    TaskCreationFailed(TaskCreationFailureReason),

    /// Network error reported by the backend
    #[error("network error: {message} (code: {code})")]
    Network {
        /// Backend specific error code
        code: i64,
        /// Error message
        message: String,
    },

    /// Request timed out
    #[error("request timed out")]
    Timeout,

    /// Request was cancelled
    #[error("request was cancelled")]
    Cancelled,

    /// No tokio runtime was available when the session was built
    #[error("no tokio runtime available")]
    RuntimeUnavailable,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal error, e.g. a backend that could not be built
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io(Arc::new(error))
    }
}

/// Why parameters could not be encoded
#[derive(Debug, Clone, Error)]
pub enum ParameterEncodingFailureReason {
    /// The request has no URL that query parameters can be attached to
    #[error("the request has no usable URL")]
    MissingUrl,
    /// JSON serialization of the parameters failed
    #[error("JSON encoding failed: {0}")]
    JsonEncodingFailed(Arc<serde_json::Error>),
    /// Property list serialization of the parameters failed
    #[error("property list encoding failed: {0}")]
    PropertyListEncodingFailed(Arc<dyn std::error::Error + Send + Sync>),
}

/// Why a multipart body could not be assembled
#[derive(Debug, Clone, Error)]
pub enum MultipartEncodingFailureReason {
    /// The body part path is not a file path
    #[error("body part path is not a file: {path:?}")]
    BodyPartUrlInvalid {
        /// Offending path
        path: PathBuf,
    },
    /// A filename could not be derived from the body part path
    #[error("no filename could be derived from {path:?}")]
    BodyPartFilenameInvalid {
        /// Offending path
        path: PathBuf,
    },
    /// The body part file does not exist or cannot be reached
    #[error("body part file is not reachable: {path:?}")]
    BodyPartFileNotReachable {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        error: Arc<std::io::Error>,
    },
    /// The body part path points at a directory
    #[error("body part path is a directory: {path:?}")]
    BodyPartFileIsDirectory {
        /// Offending path
        path: PathBuf,
    },
    /// The size of the body part file could not be determined
    #[error("body part file size is not available: {path:?}")]
    BodyPartFileSizeNotAvailable {
        /// Offending path
        path: PathBuf,
    },
    /// The body part file could not be opened for reading
    #[error("could not open body part file {path:?}: {error}")]
    BodyPartInputStreamCreationFailed {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        error: Arc<std::io::Error>,
    },
    /// The output file could not be created
    #[error("could not create output file {path:?}: {error}")]
    OutputStreamCreationFailed {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        error: Arc<std::io::Error>,
    },
    /// The output file already exists
    #[error("output file already exists: {path:?}")]
    OutputStreamFileAlreadyExists {
        /// Offending path
        path: PathBuf,
    },
    /// Writing the encoded body failed
    #[error("failed writing encoded body to {path:?}: {error}")]
    OutputStreamWriteFailed {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        error: Arc<std::io::Error>,
    },
    /// Reading a body part failed
    #[error("failed reading body part {path:?}: {error}")]
    InputStreamReadFailed {
        /// Offending path
        path: PathBuf,
        /// Underlying error
        error: Arc<std::io::Error>,
    },
}

impl MultipartEncodingFailureReason {
    /// Path of the body part or output file involved
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::BodyPartUrlInvalid { path }
            | Self::BodyPartFilenameInvalid { path }
            | Self::BodyPartFileNotReachable { path, .. }
            | Self::BodyPartFileIsDirectory { path }
            | Self::BodyPartFileSizeNotAvailable { path }
            | Self::BodyPartInputStreamCreationFailed { path, .. }
            | Self::OutputStreamCreationFailed { path, .. }
            | Self::OutputStreamFileAlreadyExists { path }
            | Self::OutputStreamWriteFailed { path, .. }
            | Self::InputStreamReadFailed { path, .. } => path,
        }
    }
}

/// Why a response was rejected by validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseValidationFailureReason {
    /// The download produced no file to validate
    #[error("downloaded file is missing")]
    DataFileNil,
    /// The downloaded file could not be read
    #[error("downloaded file could not be read: {path:?}")]
    DataFileReadFailed {
        /// Path of the downloaded file
        path: PathBuf,
    },
    /// The response carries no content type
    #[error("response has no content type, acceptable: {acceptable:?}")]
    MissingContentType {
        /// Acceptable content types
        acceptable: Vec<String>,
    },
    /// The response content type is not acceptable
    #[error("content type {response_content_type} is not one of {acceptable:?}")]
    UnacceptableContentType {
        /// Acceptable content types
        acceptable: Vec<String>,
        /// Content type of the response
        response_content_type: String,
    },
    /// The response status code is not acceptable
    #[error("unacceptable status code {code}")]
    UnacceptableStatusCode {
        /// Status code of the response
        code: u16,
    },
}

/// Why a response body could not be serialized
#[derive(Debug, Clone, Error)]
pub enum ResponseSerializationFailureReason {
    /// No body was received
    #[error("no response data")]
    InputDataNil,
    /// No body was received or the body is empty
    #[error("response data is empty")]
    InputDataNilOrZeroLength,
    /// The body is not valid text in the given encoding
    #[error("response data is not valid {encoding}")]
    StringSerializationFailed {
        /// Encoding that was attempted
        encoding: &'static str,
    },
    /// The body is not valid JSON for the requested type
    #[error("JSON serialization failed: {0}")]
    JsonSerializationFailed(Arc<serde_json::Error>),
    /// The body is not a valid property list
    #[error("property list serialization failed: {0}")]
    PropertyListSerializationFailed(Arc<dyn std::error::Error + Send + Sync>),
}

/// Why a backend task could not be created
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskCreationFailureReason {
    /// A streamed upload body was already consumed by an earlier attempt
    #[error("upload stream was already consumed")]
    UploadStreamConsumed,
    /// Resume data could not be decoded
    #[error("resume data is invalid")]
    InvalidResumeData,
    /// The backend does not support this kind of task
    #[error("{0:?} tasks are not supported by this backend")]
    Unsupported(TaskKind),
    /// The backend has been invalidated
    #[error("backend has been invalidated")]
    Invalidated,
    /// The request wrapper has nothing to recreate a task from
    #[error("request has no task descriptor")]
    NotRecreatable,
}

impl Error {
    /// Wrap an adapter failure
    pub fn adaptation(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Error::RequestAdaptationFailed(Arc::new(error))
    }

    /// Returns true for [`Error::InvalidUrl`]
    pub fn is_invalid_url(&self) -> bool {
        matches!(self, Error::InvalidUrl { .. })
    }

    /// Returns true for [`Error::Cancelled`]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Returns true for [`Error::ResponseValidationFailed`]
    pub fn is_response_validation_error(&self) -> bool {
        matches!(self, Error::ResponseValidationFailed(_))
    }

    /// Returns true for [`Error::ResponseSerializationFailed`]
    pub fn is_response_serialization_error(&self) -> bool {
        matches!(self, Error::ResponseSerializationFailed(_))
    }

    /// Returns true for errors raised by the transport rather than by this crate
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::Network { .. } | Error::Timeout | Error::Io(_) | Error::Cancelled
        )
    }

    /// Status code that failed validation, if any
    pub fn response_code(&self) -> Option<u16> {
        match self {
            Error::ResponseValidationFailed(
                ResponseValidationFailureReason::UnacceptableStatusCode { code },
            ) => Some(*code),
            _ => None,
        }
    }

    /// Acceptable content types of a failed content type validation
    pub fn acceptable_content_types(&self) -> Option<&[String]> {
        match self {
            Error::ResponseValidationFailed(
                ResponseValidationFailureReason::MissingContentType { acceptable }
                | ResponseValidationFailureReason::UnacceptableContentType { acceptable, .. },
            ) => Some(acceptable),
            _ => None,
        }
    }

    /// Content type of the response that failed validation
    pub fn response_content_type(&self) -> Option<&str> {
        match self {
            Error::ResponseValidationFailed(
                ResponseValidationFailureReason::UnacceptableContentType {
                    response_content_type,
                    ..
                },
            ) => Some(response_content_type),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_accessor() {
        let error = Error::ResponseValidationFailed(
            ResponseValidationFailureReason::UnacceptableStatusCode { code: 404 },
        );
        assert_eq!(error.response_code(), Some(404));
        assert!(error.is_response_validation_error());
        assert!(!error.is_transport_error());
        assert_eq!(error.to_string(), "response validation failed: unacceptable status code 404");
    }

    #[test]
    fn content_type_accessors() {
        let error = Error::ResponseValidationFailed(
            ResponseValidationFailureReason::UnacceptableContentType {
                acceptable: vec!["image/png".into()],
                response_content_type: "text/html".into(),
            },
        );
        assert_eq!(error.acceptable_content_types(), Some(&["image/png".to_string()][..]));
        assert_eq!(error.response_content_type(), Some("text/html"));
        assert_eq!(error.response_code(), None);
    }

    #[test]
    fn io_errors_are_shared() {
        let error: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        let cloned = error.clone();
        assert!(matches!(cloned, Error::Io(_)));
        assert!(cloned.is_transport_error());
    }

    #[test]
    fn multipart_reason_exposes_path() {
        let reason = MultipartEncodingFailureReason::BodyPartFileIsDirectory {
            path: PathBuf::from("/tmp"),
        };
        assert_eq!(reason.path(), std::path::Path::new("/tmp"));
    }
}
