//! Responses and response serializers

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::StatusCode;
use serde::de::DeserializeOwned;

use crate::backend::types::{ResponseHead, TaskMetrics};
use crate::descriptor::RequestDescriptor;
use crate::error::ResponseSerializationFailureReason;
use crate::{Error, Result};

/// Status codes whose responses carry no body
const EMPTY_DATA_STATUS_CODES: [StatusCode; 2] = [StatusCode::NO_CONTENT, StatusCode::RESET_CONTENT];

fn is_empty_status(response: Option<&ResponseHead>) -> bool {
    response.is_some_and(|r| EMPTY_DATA_STATUS_CODES.contains(&r.status))
}

/// Start and end of the last attempt of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    /// When the last attempt was started
    pub start: Option<Instant>,
    /// When the last attempt completed
    pub end: Option<Instant>,
}

impl Timeline {
    /// Time between start and end, if both are known
    pub fn duration(&self) -> Option<Duration> {
        Some(self.end?.saturating_duration_since(self.start?))
    }
}

/// Turns a buffered response into a value
pub trait ResponseSerializer: Send + Sync {
    /// Produced value
    type Output;

    /// Serialize. `error` is the request's error, if any.
    fn serialize(
        &self,
        request: Option<&RequestDescriptor>,
        response: Option<&ResponseHead>,
        data: Option<&Bytes>,
        error: Option<&Error>,
    ) -> Result<Self::Output>;
}

fn serialization(reason: ResponseSerializationFailureReason) -> Error {
    Error::ResponseSerializationFailed(reason)
}

/// Passes the body through
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSerializer;

impl ResponseSerializer for DataSerializer {
    type Output = Bytes;

    fn serialize(
        &self,
        _request: Option<&RequestDescriptor>,
        response: Option<&ResponseHead>,
        data: Option<&Bytes>,
        error: Option<&Error>,
    ) -> Result<Bytes> {
        if let Some(error) = error {
            return Err(error.clone());
        }
        if is_empty_status(response) {
            return Ok(Bytes::new());
        }
        data.cloned()
            .ok_or_else(|| serialization(ResponseSerializationFailureReason::InputDataNil))
    }
}

/// Decodes the body as text.
///
/// The charset comes from the response; UTF-8 is assumed when none is
/// given. ISO-8859-1 is decoded as such, other charsets as UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl ResponseSerializer for StringSerializer {
    type Output = String;

    fn serialize(
        &self,
        request: Option<&RequestDescriptor>,
        response: Option<&ResponseHead>,
        data: Option<&Bytes>,
        error: Option<&Error>,
    ) -> Result<String> {
        let data = DataSerializer.serialize(request, response, data, error)?;

        let charset = response.and_then(ResponseHead::text_encoding);
        match charset.as_deref() {
            Some("iso-8859-1" | "latin1" | "latin-1") => {
                Ok(data.iter().map(|&b| char::from(b)).collect())
            }
            _ => String::from_utf8(data.to_vec()).map_err(|_| {
                serialization(ResponseSerializationFailureReason::StringSerializationFailed {
                    encoding: "utf-8",
                })
            }),
        }
    }
}

/// Deserializes the body as JSON
pub struct JsonSerializer<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Default for JsonSerializer<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> ResponseSerializer for JsonSerializer<T> {
    type Output = T;

    fn serialize(
        &self,
        _request: Option<&RequestDescriptor>,
        response: Option<&ResponseHead>,
        data: Option<&Bytes>,
        error: Option<&Error>,
    ) -> Result<T> {
        if let Some(error) = error {
            return Err(error.clone());
        }
        if is_empty_status(response) {
            return serde_json::from_slice(b"null").map_err(|e| {
                serialization(ResponseSerializationFailureReason::JsonSerializationFailed(
                    Arc::new(e),
                ))
            });
        }
        let data = data.filter(|d| !d.is_empty()).ok_or_else(|| {
            serialization(ResponseSerializationFailureReason::InputDataNilOrZeroLength)
        })?;
        serde_json::from_slice(data).map_err(|e| {
            serialization(ResponseSerializationFailureReason::JsonSerializationFailed(Arc::new(e)))
        })
    }
}

/// Outcome of a data, upload or stream request
#[derive(Debug)]
pub struct DataResponse<T> {
    /// The last request sent
    pub request: Option<RequestDescriptor>,
    /// Response head, if one was received
    pub response: Option<ResponseHead>,
    /// Buffered body
    pub data: Option<Bytes>,
    /// Serialized value or the request's error
    pub result: Result<T>,
    /// Metrics of the last attempt
    pub metrics: Option<TaskMetrics>,
    /// Timing of the last attempt
    pub timeline: Timeline,
    /// Number of retries performed
    pub retry_count: u32,
}

impl<T> DataResponse<T> {
    /// The error, if the request failed
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// The value, if the request succeeded
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Status code of the response
    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }
}

/// Outcome of a download request
#[derive(Debug)]
pub struct DownloadResponse<T> {
    /// The last request sent
    pub request: Option<RequestDescriptor>,
    /// Response head, if one was received
    pub response: Option<ResponseHead>,
    /// Where the backend wrote the body
    pub temporary_path: Option<PathBuf>,
    /// Where the body was moved to, if a destination was given
    pub destination_path: Option<PathBuf>,
    /// Data to resume the download with, if it was cancelled
    pub resume_data: Option<Bytes>,
    /// Serialized value or the request's error
    pub result: Result<T>,
    /// Metrics of the last attempt
    pub metrics: Option<TaskMetrics>,
    /// Timing of the last attempt
    pub timeline: Timeline,
    /// Number of retries performed
    pub retry_count: u32,
}

impl<T> DownloadResponse<T> {
    /// The error, if the request failed
    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }

    /// The value, if the request succeeded
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Final location of the downloaded file
    pub fn file_path(&self) -> Option<&PathBuf> {
        self.destination_path.as_ref().or(self.temporary_path.as_ref())
    }
}
