//! Task factories
//!
//! A [`Requestable`] is what a request was created from. It is kept for the
//! request's lifetime so a retry can build an identical task again, with
//! the adapter re-applied.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tempfile::TempPath;

use crate::adapter::RequestAdapter;
use crate::backend::Backend;
use crate::backend::types::{BodyStream, TaskId, TransportTask, UploadBody};
use crate::descriptor::RequestDescriptor;
use crate::error::TaskCreationFailureReason;
use crate::{Error, Result};

/// Source of an upload body
pub(crate) enum Uploadable {
    /// In-memory body
    Data(Bytes),
    /// File on disk, left in place
    File(PathBuf),
    /// Temporary file removed when the request is dropped
    TempFile(Arc<TempPath>),
    /// Stream, usable for a single attempt
    Stream(Mutex<Option<BodyStream>>),
}

impl Uploadable {
    pub(crate) fn stream(stream: BodyStream) -> Self {
        Uploadable::Stream(Mutex::new(Some(stream)))
    }

    fn body(&self) -> Result<UploadBody> {
        match self {
            Uploadable::Data(data) => Ok(UploadBody::Data(data.clone())),
            Uploadable::File(path) => Ok(UploadBody::File(path.clone())),
            Uploadable::TempFile(path) => Ok(UploadBody::File(path.to_path_buf())),
            Uploadable::Stream(stream) => stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .map(UploadBody::Stream)
                .ok_or(Error::TaskCreationFailed(
                    TaskCreationFailureReason::UploadStreamConsumed,
                )),
        }
    }
}

impl fmt::Debug for Uploadable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uploadable::Data(data) => f.debug_tuple("Data").field(&data.len()).finish(),
            Uploadable::File(path) => f.debug_tuple("File").field(path).finish(),
            Uploadable::TempFile(path) => f.debug_tuple("TempFile").field(&path.to_path_buf()).finish(),
            Uploadable::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// What a request's tasks are built from
#[derive(Debug)]
pub(crate) enum Requestable {
    Data {
        request: RequestDescriptor,
    },
    Download {
        request: RequestDescriptor,
    },
    DownloadResuming {
        resume_data: Bytes,
    },
    Upload {
        request: RequestDescriptor,
        body: Uploadable,
    },
    Stream {
        host: String,
        port: u16,
    },
}

impl Requestable {
    /// Adapt the descriptor and create a suspended task.
    ///
    /// Returns the task and the request it will send, if any.
    pub(crate) fn create_task(
        &self,
        backend: &dyn Backend,
        adapter: Option<&dyn RequestAdapter>,
    ) -> Result<(TaskId, Option<RequestDescriptor>)> {
        let adapt = |request: &RequestDescriptor| match adapter {
            Some(adapter) => adapter.adapt(request.clone()),
            None => Ok(request.clone()),
        };

        let (task, sent) = match self {
            Requestable::Data { request } => {
                let request = adapt(request)?;
                (
                    TransportTask::Data {
                        request: request.clone(),
                    },
                    Some(request),
                )
            }
            Requestable::Download { request } => {
                let request = adapt(request)?;
                (
                    TransportTask::Download {
                        request: request.clone(),
                    },
                    Some(request),
                )
            }
            Requestable::DownloadResuming { resume_data } => (
                TransportTask::DownloadResuming {
                    resume_data: resume_data.clone(),
                },
                None,
            ),
            Requestable::Upload { request, body } => {
                let request = adapt(request)?;
                (
                    TransportTask::Upload {
                        request: request.clone(),
                        body: body.body()?,
                    },
                    Some(request),
                )
            }
            Requestable::Stream { host, port } => (
                TransportTask::Stream {
                    host: host.clone(),
                    port: *port,
                },
                None,
            ),
        };

        let id = backend.create_task(task)?;
        Ok((id, sent))
    }
}
