//! Shared types between the session and backend implementations

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use http::{HeaderMap, StatusCode, header};
use url::Url;

use crate::auth::Credential;
use crate::descriptor::RequestDescriptor;

/// Identifier the backend assigns to a live task.
///
/// Identifiers are unique among live tasks of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Wrap a raw identifier
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Kind of a backend task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Body is buffered in memory
    Data,
    /// Body is written to a file
    Download,
    /// Request body is streamed from data, a file or a stream
    Upload,
    /// Bidirectional byte stream to a host
    Stream,
}

/// Stream of upload body chunks
pub type BodyStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Request body of an upload task
pub enum UploadBody {
    /// In-memory body
    Data(Bytes),
    /// Body read from a file
    File(PathBuf),
    /// Body pulled from a stream
    Stream(BodyStream),
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadBody::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            UploadBody::File(path) => f.debug_tuple("File").field(path).finish(),
            UploadBody::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A fully prepared task handed to the backend
#[derive(Debug)]
pub enum TransportTask {
    /// Buffered data task
    Data {
        /// Adapted request
        request: RequestDescriptor,
    },
    /// Download task writing to a temporary file
    Download {
        /// Adapted request
        request: RequestDescriptor,
    },
    /// Download task continuing from resume data
    DownloadResuming {
        /// Opaque resume data produced by the same backend
        resume_data: Bytes,
    },
    /// Upload task
    Upload {
        /// Adapted request
        request: RequestDescriptor,
        /// Body to send
        body: UploadBody,
    },
    /// Bidirectional stream task
    Stream {
        /// Host to connect to
        host: String,
        /// Port to connect to
        port: u16,
    },
}

impl TransportTask {
    /// Kind of the task
    pub fn kind(&self) -> TaskKind {
        match self {
            TransportTask::Data { .. } => TaskKind::Data,
            TransportTask::Download { .. } | TransportTask::DownloadResuming { .. } => {
                TaskKind::Download
            }
            TransportTask::Upload { .. } => TaskKind::Upload,
            TransportTask::Stream { .. } => TaskKind::Stream,
        }
    }

    /// Request the task will send, if it is an HTTP task built from a request
    pub fn request(&self) -> Option<&RequestDescriptor> {
        match self {
            TransportTask::Data { request }
            | TransportTask::Download { request }
            | TransportTask::Upload { request, .. } => Some(request),
            TransportTask::DownloadResuming { .. } | TransportTask::Stream { .. } => None,
        }
    }
}

/// Status line and headers of a received response
#[derive(Debug, Clone)]
pub struct ResponseHead {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Final URL after redirects
    pub url: Url,
    /// Expected body length, if announced
    pub expected_content_length: Option<u64>,
}

impl ResponseHead {
    /// Create a response head without an announced length
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        let expected_content_length = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());

        Self {
            status,
            headers,
            url,
            expected_content_length,
        }
    }

    /// Content type without parameters, e.g. `text/html` for `text/html; charset=utf-8`
    pub fn mime_type(&self) -> Option<String> {
        let value = self.headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        let essence = value.split(';').next().unwrap_or_default().trim();
        if essence.is_empty() {
            None
        } else {
            Some(essence.to_ascii_lowercase())
        }
    }

    /// Value of the `charset` parameter of the content type
    pub fn text_encoding(&self) -> Option<String> {
        let value = self.headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        value.split(';').skip(1).find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        })
    }
}

/// Authentication scheme requested by a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthScheme {
    /// HTTP Basic
    Basic,
    /// Any other scheme, by name
    Other(String),
}

/// Authentication challenge received from a server
#[derive(Debug, Clone)]
pub struct AuthChallenge {
    /// Host issuing the challenge
    pub host: String,
    /// Port of the host
    pub port: Option<u16>,
    /// Realm announced by the server
    pub realm: Option<String>,
    /// Scheme requested
    pub scheme: AuthScheme,
    /// How many times this challenge has already failed for the task
    pub previous_failure_count: u32,
}

impl AuthChallenge {
    /// Parse a `WWW-Authenticate` header value
    pub fn from_header(url: &Url, value: &str, previous_failure_count: u32) -> Self {
        let value = value.trim();
        let (scheme, params) = value.split_once(' ').unwrap_or((value, ""));
        let scheme = if scheme.eq_ignore_ascii_case("basic") {
            AuthScheme::Basic
        } else {
            AuthScheme::Other(scheme.to_string())
        };
        let realm = params.split(',').find_map(|param| {
            let (name, value) = param.split_once('=')?;
            name.trim()
                .eq_ignore_ascii_case("realm")
                .then(|| value.trim().trim_matches('"').to_string())
        });

        Self {
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port_or_known_default(),
            realm,
            scheme,
            previous_failure_count,
        }
    }
}

/// How a backend should answer a challenge
#[derive(Debug, Clone)]
pub enum ChallengeDisposition {
    /// Answer with the given credential
    UseCredential(Credential),
    /// Let the backend behave as if no handler was installed
    PerformDefaultHandling,
    /// Cancel the task
    CancelChallenge,
    /// Skip this protection space
    RejectProtectionSpace,
}

/// Timing information collected for one task
#[derive(Debug, Clone, Default)]
pub struct TaskMetrics {
    /// When the first request was sent
    pub fetch_start: Option<Instant>,
    /// When the response head arrived
    pub response_start: Option<Instant>,
    /// When the body was fully received
    pub response_end: Option<Instant>,
    /// Redirects followed
    pub redirect_count: u32,
    /// Body bytes sent
    pub bytes_sent: u64,
    /// Body bytes received
    pub bytes_received: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn head(content_type: &str) -> ResponseHead {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        ResponseHead::new(
            StatusCode::OK,
            headers,
            Url::parse("https://api.example.com/items").unwrap(),
        )
    }

    #[test]
    fn mime_type_strips_parameters() {
        let head = head("Application/JSON; charset=UTF-8");
        assert_eq!(head.mime_type().as_deref(), Some("application/json"));
        assert_eq!(head.text_encoding().as_deref(), Some("utf-8"));
    }

    #[test]
    fn challenge_parses_basic_realm() {
        let url = Url::parse("https://api.example.com/secure").unwrap();
        let challenge = AuthChallenge::from_header(&url, r#"Basic realm="api", charset="UTF-8""#, 0);
        assert_eq!(challenge.scheme, AuthScheme::Basic);
        assert_eq!(challenge.realm.as_deref(), Some("api"));
        assert_eq!(challenge.host, "api.example.com");
        assert_eq!(challenge.port, Some(443));
    }

    #[test]
    fn task_kind_of_resuming_download() {
        let task = TransportTask::DownloadResuming {
            resume_data: Bytes::from_static(b"{}"),
        };
        assert_eq!(task.kind(), TaskKind::Download);
        assert!(task.request().is_none());
    }
}
