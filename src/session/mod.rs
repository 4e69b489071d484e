//! Session manager
//!
//! A [`Session`] owns the backend, the completion dispatcher and the
//! configuration shared by its requests. Every operation returns a request
//! wrapper, even when the request could not be built; the failure is then the
//! wrapper's error.

mod config;

pub use config::{SessionBuilder, SessionConfig};

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use http::header;
use tokio::sync::broadcast;

use crate::backend::Backend;
use crate::backend::types::{BodyStream, TaskId};
use crate::delegate::SessionDelegate;
use crate::descriptor::{IntoRequest, RequestDescriptor};
use crate::error::TaskCreationFailureReason;
use crate::events::{EventBus, LifecycleEvent};
use crate::multipart::MultipartFormData;
use crate::request::{
    DataRequest, Destination, DownloadRequest, KindState, Request, RequestInner, StreamRequest,
    UploadRequest,
};
use crate::task::{Requestable, Uploadable};
use crate::{Error, Result};

pub(crate) struct SessionInner {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) delegate: Arc<SessionDelegate>,
    pub(crate) config: SessionConfig,
    pub(crate) events: EventBus,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.delegate.registry.is_empty() {
            tracing::debug!("session dropped");
        } else {
            tracing::debug!(active = self.delegate.registry.len(), "session dropped with tasks in flight");
        }
        self.backend.invalidate();
    }
}

/// Entry point for making requests.
///
/// Cloning is cheap and clones share everything. Pending retries are
/// abandoned once the last clone is dropped.
///
/// ```rust,no_run
/// # async fn run() -> tether::Result<()> {
/// use tether::{RetryPolicy, Session};
///
/// let session = Session::builder().retrier(RetryPolicy::default()).build()?;
/// let response = session
///     .request("https://httpbin.org/get")
///     .validate()
///     .response_string()
///     .await;
/// println!("{:?}", response.result);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    pub(crate) inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.inner.config)
            .field("active_tasks", &self.active_tasks())
            .finish()
    }
}

impl Session {
    /// Create a session with default configuration and the default backend
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a session builder
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Configuration of this session
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Receive lifecycle events of every task of this session
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Retries waiting for their delay to elapse.
    ///
    /// Retries still pending when the session is dropped are abandoned; their
    /// requests finish with the error that triggered the retry.
    pub fn pending_retries(&self) -> usize {
        self.inner.delegate.pending_retries()
    }

    /// Tasks currently registered with the session
    pub fn active_tasks(&self) -> usize {
        self.inner.delegate.registry.len()
    }

    /// Make a request whose response is buffered in memory
    pub fn request(&self, request: impl IntoRequest) -> DataRequest {
        let requestable = self
            .prepare(request)
            .map(|request| Requestable::Data { request });
        DataRequest(self.perform(requestable, KindState::Data))
    }

    /// Download to a temporary file that is kept in place
    pub fn download(&self, request: impl IntoRequest) -> DownloadRequest {
        self.download_with(request, None)
    }

    /// Download and move the file to `destination` when done
    pub fn download_to(&self, request: impl IntoRequest, destination: Destination) -> DownloadRequest {
        self.download_with(request, Some(destination))
    }

    fn download_with(
        &self,
        request: impl IntoRequest,
        destination: Option<Destination>,
    ) -> DownloadRequest {
        let requestable = self
            .prepare(request)
            .map(|request| Requestable::Download { request });
        DownloadRequest(self.perform(requestable, KindState::download(destination)))
    }

    /// Continue a cancelled download from its resume data
    pub fn download_resuming(
        &self,
        resume_data: impl Into<Bytes>,
        destination: Option<Destination>,
    ) -> DownloadRequest {
        let requestable = Ok(Requestable::DownloadResuming {
            resume_data: resume_data.into(),
        });
        DownloadRequest(self.perform(requestable, KindState::download(destination)))
    }

    /// Upload `data` as the request body
    pub fn upload(&self, data: impl Into<Bytes>, request: impl IntoRequest) -> UploadRequest {
        self.upload_with(Uploadable::Data(data.into()), request)
    }

    /// Upload the contents of the file at `path`
    pub fn upload_file(&self, path: impl Into<PathBuf>, request: impl IntoRequest) -> UploadRequest {
        self.upload_with(Uploadable::File(path.into()), request)
    }

    /// Upload a body pulled from `stream`.
    ///
    /// A stream can only be sent once, so a retry of this request fails.
    pub fn upload_stream(&self, stream: BodyStream, request: impl IntoRequest) -> UploadRequest {
        self.upload_with(Uploadable::stream(stream), request)
    }

    /// Upload a multipart form.
    ///
    /// Forms larger than the session's memory threshold are encoded to a
    /// temporary file that lives as long as the request.
    pub fn upload_multipart(&self, form: MultipartFormData, request: impl IntoRequest) -> UploadRequest {
        let requestable = self.prepare(request).and_then(|mut request| {
            if !request.headers.contains_key(header::CONTENT_TYPE) {
                request.set_header(header::CONTENT_TYPE.as_str(), &form.content_type())?;
            }
            let body = self.encode_multipart(&form)?;
            Ok(Requestable::Upload { request, body })
        });
        UploadRequest(DataRequest(self.perform(requestable, KindState::Upload)))
    }

    fn encode_multipart(&self, form: &MultipartFormData) -> Result<Uploadable> {
        let length = form.content_length();
        if length < self.inner.config.multipart_memory_threshold {
            return Ok(Uploadable::Data(form.encode()?));
        }

        let mut file = tempfile::NamedTempFile::new()?;
        let path = file.path().to_path_buf();
        form.write_to(file.as_file_mut(), Some(&path))?;
        tracing::debug!(length, ?path, "multipart body encoded to disk");
        Ok(Uploadable::TempFile(Arc::new(file.into_temp_path())))
    }

    fn upload_with(&self, body: Uploadable, request: impl IntoRequest) -> UploadRequest {
        let requestable = self
            .prepare(request)
            .map(|request| Requestable::Upload { request, body });
        UploadRequest(DataRequest(self.perform(requestable, KindState::Upload)))
    }

    /// Open a bidirectional byte stream to `host`
    pub fn stream(&self, host: impl Into<String>, port: u16) -> StreamRequest {
        let requestable = Ok(Requestable::Stream {
            host: host.into(),
            port,
        });
        StreamRequest(DataRequest(self.perform(requestable, KindState::stream())))
    }

    fn prepare(&self, request: impl IntoRequest) -> Result<RequestDescriptor> {
        let request = request.into_request()?;
        Ok(self.inner.config.apply_defaults(request))
    }

    /// Create, register and start a task for `requestable`
    fn perform(&self, requestable: Result<Requestable>, kind: KindState) -> Request {
        let backend = self.inner.backend.clone();
        let events = self.inner.events.clone();

        let (requestable, created) = match requestable {
            Ok(requestable) => {
                let created =
                    requestable.create_task(backend.as_ref(), self.inner.config.adapter.as_deref());
                (Some(requestable), created)
            }
            Err(error) => (None, Err(error)),
        };

        let inner = match created {
            Ok((task, request)) => {
                let inner = Arc::new(RequestInner::new(backend, events, requestable, kind));
                inner.attach(task, request);
                self.inner.delegate.registry.set(task, Some(inner.clone()));
                tracing::debug!(%task, kind = ?inner.kind(), "task created");
                inner
            }
            Err(error) => {
                tracing::debug!(%error, "request could not be created");
                Arc::new(RequestInner::failed(backend, events, requestable, kind, error))
            }
        };

        if self.inner.config.start_requests_immediately {
            inner.resume();
        }
        Request::from_inner(inner)
    }

    /// Replace the finished task `old` of `request` with a new one
    pub(crate) fn retry(&self, request: &Arc<RequestInner>, old: TaskId) {
        let delegate = &self.inner.delegate;
        let Some(requestable) = request.requestable() else {
            delegate.finalize(
                request,
                old,
                Some(Error::TaskCreationFailed(TaskCreationFailureReason::NotRecreatable)),
            );
            return;
        };

        match requestable.create_task(self.inner.backend.as_ref(), self.inner.config.adapter.as_deref()) {
            Ok((task, descriptor)) => {
                let live = request.reset_for_retry(task, descriptor);
                delegate.registry.replace(Some(old), task, request.clone());
                tracing::debug!(%old, new = %task, retry_count = request.retry_count(), "retrying request");
                if live {
                    request.resume();
                } else {
                    self.inner.backend.cancel(task);
                }
            }
            Err(error) => {
                tracing::warn!(%old, %error, "could not recreate task for retry");
                request.set_error(error);
                delegate.finalize(request, old, None);
            }
        }
    }
}
