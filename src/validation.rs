//! Response validation
//!
//! Validations are deferred checks attached to a request. They run once per
//! completion, in the order they were added, before the error that ends the
//! attempt is decided. Every validation runs; the first failure is the one
//! recorded.

use std::borrow::Cow;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use http::header;

use crate::backend::types::ResponseHead;
use crate::descriptor::RequestDescriptor;
use crate::error::ResponseValidationFailureReason;
use crate::mime::{self, MimeType};
use crate::{Error, Result};

/// Status codes accepted by [`Request::validate`](crate::Request::validate)
pub const DEFAULT_ACCEPTABLE_STATUS: std::ops::Range<u16> = 200..300;

/// Body of the response being validated
#[derive(Debug, Clone, Copy)]
pub enum ResponseBody<'a> {
    /// Buffered body, `None` if nothing was received
    Data(Option<&'a [u8]>),
    /// Downloaded file, `None` if the download produced no file
    File(Option<&'a Path>),
}

/// Everything a validation gets to look at
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// The last request sent, after adaptation
    pub request: Option<&'a RequestDescriptor>,
    /// Response head
    pub response: &'a ResponseHead,
    /// Response body
    pub body: ResponseBody<'a>,
}

impl<'a> ValidationContext<'a> {
    /// Load the body. Downloads are read from disk.
    pub fn data(&self) -> Result<Option<Cow<'a, [u8]>>> {
        match self.body {
            ResponseBody::Data(data) => Ok(data.map(Cow::Borrowed)),
            ResponseBody::File(None) => Err(Error::ResponseValidationFailed(
                ResponseValidationFailureReason::DataFileNil,
            )),
            ResponseBody::File(Some(path)) => std::fs::read(path)
                .map(|data| Some(Cow::Owned(data)))
                .map_err(|_| {
                    Error::ResponseValidationFailed(
                        ResponseValidationFailureReason::DataFileReadFailed {
                            path: path.to_path_buf(),
                        },
                    )
                }),
        }
    }
}

/// A validation closure
pub type Validation = Arc<dyn Fn(&ValidationContext<'_>) -> Result<()> + Send + Sync>;

/// Ordered list of validations of one request
#[derive(Default)]
pub(crate) struct Validations {
    items: Mutex<Vec<Validation>>,
}

impl Validations {
    pub(crate) fn push(&self, validation: Validation) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(validation);
    }

    /// Run all validations and return the first failure
    pub(crate) fn run(&self, context: &ValidationContext<'_>) -> Option<Error> {
        // Snapshot so a validation may add validations without deadlocking
        let items = self
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut first = None;
        for validation in items {
            if let Err(error) = validation(context) {
                first.get_or_insert(error);
            }
        }
        first
    }
}

/// Fail unless the status code is one of `acceptable`
pub fn status(acceptable: &[u16], response: &ResponseHead) -> Result<()> {
    let code = response.status.as_u16();
    if acceptable.contains(&code) {
        Ok(())
    } else {
        Err(Error::ResponseValidationFailed(
            ResponseValidationFailureReason::UnacceptableStatusCode { code },
        ))
    }
}

/// Fail unless the response content type matches one of `acceptable`.
///
/// Empty bodies always pass. A response without a content type passes only
/// when `*/*` is acceptable.
pub fn content_type(
    acceptable: &[String],
    response: &ResponseHead,
    data: Option<&[u8]>,
) -> Result<()> {
    if data.is_none_or(|data| data.is_empty()) {
        return Ok(());
    }

    let response_type = response
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(MimeType::parse);

    let Some(response_type) = response_type else {
        if acceptable
            .iter()
            .filter_map(|a| MimeType::parse(a))
            .any(|a| a.is_wildcard())
        {
            return Ok(());
        }
        return Err(Error::ResponseValidationFailed(
            ResponseValidationFailureReason::MissingContentType {
                acceptable: acceptable.to_vec(),
            },
        ));
    };

    if acceptable
        .iter()
        .filter_map(|a| MimeType::parse(a))
        .any(|a| a.matches(&response_type))
    {
        return Ok(());
    }

    Err(Error::ResponseValidationFailed(
        ResponseValidationFailureReason::UnacceptableContentType {
            acceptable: acceptable.to_vec(),
            response_content_type: response_type.to_string(),
        },
    ))
}

/// Media ranges from the request's `Accept` header, `*/*` if absent
pub fn acceptable_content_types(request: Option<&RequestDescriptor>) -> Vec<String> {
    request
        .and_then(|r| r.header(header::ACCEPT))
        .map(mime::parse_accept)
        .filter(|types| !types.is_empty())
        .unwrap_or_else(|| vec!["*/*".to_string()])
}

pub(crate) fn status_validation(acceptable: Vec<u16>) -> Validation {
    Arc::new(move |context| status(&acceptable, context.response))
}

pub(crate) fn content_type_validation(acceptable: Vec<String>) -> Validation {
    Arc::new(move |context| {
        let data = context.data()?;
        content_type(&acceptable, context.response, data.as_deref())
    })
}

/// Status in 200..300 and content type matching the `Accept` header
pub(crate) fn default_validation() -> Validation {
    let acceptable_status: Vec<u16> = DEFAULT_ACCEPTABLE_STATUS.collect();
    Arc::new(move |context| {
        status(&acceptable_status, context.response)?;
        let acceptable = acceptable_content_types(context.request);
        let data = context.data()?;
        content_type(&acceptable, context.response, data.as_deref())
    })
}
