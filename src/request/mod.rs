//! Request wrappers
//!
//! A request wrapper outlives the individual backend tasks it runs: a retry
//! replaces the task and the per-attempt state while keeping validations,
//! credentials and handlers.

mod data;
mod download;
mod stream;
mod upload;

pub use data::DataRequest;
pub use download::{Destination, DownloadOptions, DownloadRequest};
pub use stream::StreamRequest;
pub use upload::UploadRequest;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::auth::Credential;
use crate::backend::Backend;
use crate::backend::types::{
    AuthChallenge, ChallengeDisposition, ResponseHead, TaskId, TaskKind, TaskMetrics,
};
use crate::descriptor::RequestDescriptor;
use crate::events::{EventBus, LifecycleEventKind};
use crate::response::Timeline;
use crate::task::Requestable;
use crate::validation::{self, ResponseBody, ValidationContext, Validations};
use crate::{Error, Result};

const UNKNOWN: u64 = u64::MAX;

/// State of a request's current task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Created, not started yet
    Initialized = 0,
    /// Running
    Running = 1,
    /// Paused
    Suspended = 2,
    /// Cancelled, completion pending or delivered
    Cancelled = 3,
    /// Finished
    Completed = 4,
}

impl TaskState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TaskState::Initialized,
            1 => TaskState::Running,
            2 => TaskState::Suspended,
            3 => TaskState::Cancelled,
            _ => TaskState::Completed,
        }
    }
}

/// Transfer progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Bytes transferred so far
    pub completed: u64,
    /// Bytes expected in total, if known
    pub total: Option<u64>,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`, if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

pub(crate) type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync>;
pub(crate) type DataHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

/// State of one attempt. Replaced wholesale on retry.
pub(crate) struct TaskContext {
    response: ArcSwapOption<ResponseHead>,
    data: Mutex<BytesMut>,
    received: AtomicU64,
    expected: AtomicU64,
    sent: AtomicU64,
    expected_sent: AtomicU64,
    error: ArcSwapOption<Error>,
    metrics: ArcSwapOption<TaskMetrics>,
    temporary_path: ArcSwapOption<PathBuf>,
    destination_path: ArcSwapOption<PathBuf>,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self {
            response: ArcSwapOption::new(None),
            data: Mutex::new(BytesMut::new()),
            received: AtomicU64::new(0),
            expected: AtomicU64::new(UNKNOWN),
            sent: AtomicU64::new(0),
            expected_sent: AtomicU64::new(UNKNOWN),
            error: ArcSwapOption::new(None),
            metrics: ArcSwapOption::new(None),
            temporary_path: ArcSwapOption::new(None),
            destination_path: ArcSwapOption::new(None),
        }
    }
}

fn known(value: u64) -> Option<u64> {
    (value != UNKNOWN).then_some(value)
}

impl TaskContext {
    fn with_error(error: Error) -> Self {
        let context = Self::default();
        context.error.store(Some(Arc::new(error)));
        context
    }

    /// Keeps an earlier error
    fn set_error_if_absent(&self, error: Error) {
        if self.error.load().is_none() {
            self.error.store(Some(Arc::new(error)));
        }
    }

    fn data(&self) -> Bytes {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Bytes::copy_from_slice(&data)
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.destination_path
            .load_full()
            .or_else(|| self.temporary_path.load_full())
            .map(|p| (*p).clone())
    }

    fn downloaded(&self) -> Progress {
        Progress {
            completed: self.received.load(Ordering::Acquire),
            total: known(self.expected.load(Ordering::Acquire)),
        }
    }

    fn uploaded(&self) -> Progress {
        Progress {
            completed: self.sent.load(Ordering::Acquire),
            total: known(self.expected_sent.load(Ordering::Acquire)),
        }
    }
}

pub(crate) struct DownloadState {
    destination: Option<Destination>,
    resume_data: ArcSwapOption<Bytes>,
}

pub(crate) struct StreamState {
    handler: Mutex<Option<DataHandler>>,
}

/// Kind specific state
pub(crate) enum KindState {
    Data,
    Download(DownloadState),
    Upload,
    Stream(StreamState),
}

impl KindState {
    pub(crate) fn download(destination: Option<Destination>) -> Self {
        KindState::Download(DownloadState {
            destination,
            resume_data: ArcSwapOption::new(None),
        })
    }

    pub(crate) fn stream() -> Self {
        KindState::Stream(StreamState {
            handler: Mutex::new(None),
        })
    }
}

/// Shared state behind a [`Request`]
pub(crate) struct RequestInner {
    backend: Arc<dyn Backend>,
    events: EventBus,
    requestable: Option<Requestable>,
    task: ArcSwapOption<TaskId>,
    request: ArcSwapOption<RequestDescriptor>,
    state: AtomicU8,
    retry_count: AtomicU32,
    start_time: ArcSwapOption<Instant>,
    end_time: ArcSwapOption<Instant>,
    validations: Validations,
    context: ArcSwap<TaskContext>,
    credential: ArcSwapOption<Credential>,
    download_progress: Mutex<Option<ProgressHandler>>,
    upload_progress: Mutex<Option<ProgressHandler>>,
    kind: KindState,
    finished: AtomicBool,
    notify: Notify,
}

impl RequestInner {
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        events: EventBus,
        requestable: Option<Requestable>,
        kind: KindState,
    ) -> Self {
        Self {
            backend,
            events,
            requestable,
            task: ArcSwapOption::new(None),
            request: ArcSwapOption::new(None),
            state: AtomicU8::new(TaskState::Initialized as u8),
            retry_count: AtomicU32::new(0),
            start_time: ArcSwapOption::new(None),
            end_time: ArcSwapOption::new(None),
            validations: Validations::default(),
            context: ArcSwap::from_pointee(TaskContext::default()),
            credential: ArcSwapOption::new(None),
            download_progress: Mutex::new(None),
            upload_progress: Mutex::new(None),
            kind,
            finished: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// A wrapper that never got a task
    pub(crate) fn failed(
        backend: Arc<dyn Backend>,
        events: EventBus,
        requestable: Option<Requestable>,
        kind: KindState,
        error: Error,
    ) -> Self {
        let inner = Self::new(backend, events, requestable, kind);
        inner.context.store(Arc::new(TaskContext::with_error(error)));
        inner
    }

    pub(crate) fn attach(&self, task: TaskId, request: Option<RequestDescriptor>) {
        self.task.store(Some(Arc::new(task)));
        self.request.store(request.map(Arc::new));
    }

    pub(crate) fn requestable(&self) -> Option<&Requestable> {
        self.requestable.as_ref()
    }

    pub(crate) fn task_id(&self) -> Option<TaskId> {
        self.task.load().as_deref().copied()
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    fn transition(&self, from: &[TaskState], to: TaskState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                from.contains(&TaskState::from_u8(current)).then_some(to as u8)
            })
            .is_ok()
    }

    pub(crate) fn resume(&self) {
        let Some(task) = self.task_id() else {
            self.finish();
            return;
        };
        if !self.transition(&[TaskState::Initialized, TaskState::Suspended], TaskState::Running) {
            return;
        }
        if self.start_time.load().is_none() {
            self.start_time.store(Some(Arc::new(Instant::now())));
        }
        self.backend.resume(task);
        self.events.publish(LifecycleEventKind::Resumed, task);
    }

    pub(crate) fn suspend(&self) {
        let Some(task) = self.task_id() else {
            return;
        };
        if !self.transition(&[TaskState::Initialized, TaskState::Running], TaskState::Suspended) {
            return;
        }
        self.backend.suspend(task);
        self.events.publish(LifecycleEventKind::Suspended, task);
    }

    pub(crate) fn cancel(&self) {
        let Some(task) = self.task_id() else {
            return;
        };
        if !self.transition(
            &[TaskState::Initialized, TaskState::Running, TaskState::Suspended],
            TaskState::Cancelled,
        ) {
            return;
        }
        match &self.kind {
            KindState::Download(download) => {
                let resume_data = self.backend.cancel_producing_resume_data(task);
                download.resume_data.store(resume_data.map(Arc::new));
            }
            _ => self.backend.cancel(task),
        }
        self.events.publish(LifecycleEventKind::Cancelled, task);
    }

    /// Swap in a new task for a retry.
    ///
    /// Returns false if the request was cancelled meanwhile; the new task is
    /// then left to the caller to cancel.
    pub(crate) fn reset_for_retry(&self, task: TaskId, request: Option<RequestDescriptor>) -> bool {
        self.context.store(Arc::new(TaskContext::default()));
        self.attach(task, request);
        self.retry_count.fetch_add(1, Ordering::AcqRel);
        self.start_time.store(Some(Arc::new(Instant::now())));
        self.end_time.store(None);
        self.transition(
            &[TaskState::Running, TaskState::Suspended, TaskState::Initialized],
            TaskState::Initialized,
        )
    }

    pub(crate) fn mark_end(&self) {
        self.end_time.store(Some(Arc::new(Instant::now())));
    }

    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    pub(crate) fn timeline(&self) -> Timeline {
        Timeline {
            start: self.start_time.load().as_deref().copied(),
            end: self.end_time.load().as_deref().copied(),
        }
    }

    pub(crate) fn error(&self) -> Option<Error> {
        self.context.load().error.load_full().map(|e| (*e).clone())
    }

    pub(crate) fn set_error(&self, error: Error) {
        self.context.load().error.store(Some(Arc::new(error)));
    }

    pub(crate) fn set_error_if_absent(&self, error: Error) {
        self.context.load().set_error_if_absent(error);
    }

    pub(crate) fn response_head(&self) -> Option<ResponseHead> {
        self.context.load().response.load_full().map(|r| (*r).clone())
    }

    pub(crate) fn request(&self) -> Option<RequestDescriptor> {
        self.request.load_full().map(|r| (*r).clone())
    }

    pub(crate) fn metrics(&self) -> Option<TaskMetrics> {
        self.context.load().metrics.load_full().map(|m| (*m).clone())
    }

    pub(crate) fn data(&self) -> Bytes {
        self.context.load().data()
    }

    pub(crate) fn kind(&self) -> TaskKind {
        match &self.kind {
            KindState::Data => TaskKind::Data,
            KindState::Download(_) => TaskKind::Download,
            KindState::Upload => TaskKind::Upload,
            KindState::Stream(_) => TaskKind::Stream,
        }
    }

    pub(crate) fn add_validation(&self, validation: validation::Validation) {
        self.validations.push(validation);
    }

    /// Run every validation against the current response.
    ///
    /// Without a response head there is nothing to validate.
    pub(crate) fn validate_response(&self) {
        let context = self.context.load_full();
        let Some(response) = context.response.load_full() else {
            return;
        };
        let request = self.request.load_full();
        let data;
        let path;
        let body = match &self.kind {
            KindState::Download(_) => {
                path = context.file_path();
                ResponseBody::File(path.as_deref())
            }
            _ => {
                data = context.data();
                ResponseBody::Data((!data.is_empty()).then_some(&data[..]))
            }
        };
        let validation_context = ValidationContext {
            request: request.as_deref(),
            response: &response,
            body,
        };
        if let Some(error) = self.validations.run(&validation_context) {
            tracing::debug!(%error, "response failed validation");
            context.set_error_if_absent(error);
        }
    }

    /// Release everyone waiting on this request
    pub(crate) fn finish(&self) {
        let _ = self.transition(
            &[TaskState::Initialized, TaskState::Running, TaskState::Suspended],
            TaskState::Completed,
        );
        self.finished.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_finished() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn did_receive_response(&self, response: ResponseHead) {
        let context = self.context.load();
        if let Some(expected) = response.expected_content_length {
            context.expected.store(expected, Ordering::Release);
        }
        context.response.store(Some(Arc::new(response)));
    }

    pub(crate) fn did_receive_data(&self, data: Bytes) {
        let context = self.context.load_full();
        context
            .received
            .fetch_add(data.len() as u64, Ordering::AcqRel);

        let handler = match &self.kind {
            KindState::Stream(stream) => stream
                .handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            _ => None,
        };
        match handler {
            Some(handler) => handler(data),
            None => context
                .data
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&data),
        }

        self.report_download_progress(context.downloaded());
    }

    pub(crate) fn did_write_data(&self, total_written: u64, total_expected: Option<u64>) {
        let context = self.context.load_full();
        context.received.store(total_written, Ordering::Release);
        if let Some(expected) = total_expected {
            context.expected.store(expected, Ordering::Release);
        }
        self.report_download_progress(context.downloaded());
    }

    pub(crate) fn did_send_body_data(&self, total_sent: u64, total_expected: Option<u64>) {
        let context = self.context.load_full();
        context.sent.store(total_sent, Ordering::Release);
        if let Some(expected) = total_expected {
            context.expected_sent.store(expected, Ordering::Release);
        }
        let handler = self
            .upload_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(context.uploaded());
        }
    }

    fn report_download_progress(&self, progress: Progress) {
        let handler = self
            .download_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(progress);
        }
    }

    /// Move a finished download to its destination
    pub(crate) fn did_finish_downloading(&self, location: PathBuf) {
        let context = self.context.load_full();
        context.temporary_path.store(Some(Arc::new(location.clone())));

        let KindState::Download(download) = &self.kind else {
            return;
        };
        let Some(destination) = &download.destination else {
            return;
        };
        let Some(response) = context.response.load_full() else {
            tracing::warn!(path = ?location, "download finished without a response, leaving file in place");
            return;
        };

        let (target, options) = destination.resolve(&location, &response);
        match download::move_file(&location, &target, options) {
            Ok(()) => context.destination_path.store(Some(Arc::new(target))),
            Err(error) => {
                tracing::error!(from = ?location, to = ?target, %error, "failed to move download");
                context.set_error_if_absent(error.into());
            }
        }
    }

    pub(crate) fn did_finish_collecting_metrics(&self, metrics: TaskMetrics) {
        self.context.load().metrics.store(Some(Arc::new(metrics)));
    }

    /// Answer a challenge with the request's credential
    pub(crate) fn challenge_disposition(&self, challenge: &AuthChallenge) -> ChallengeDisposition {
        match self.credential.load_full() {
            Some(_) if challenge.previous_failure_count > 0 => {
                ChallengeDisposition::RejectProtectionSpace
            }
            Some(credential) => ChallengeDisposition::UseCredential((*credential).clone()),
            None => ChallengeDisposition::PerformDefaultHandling,
        }
    }

    fn downloaded(&self) -> Progress {
        self.context.load().downloaded()
    }

    fn uploaded(&self) -> Progress {
        self.context.load().uploaded()
    }

    fn file_path(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        let context = self.context.load();
        (
            context.temporary_path.load_full().map(|p| (*p).clone()),
            context.destination_path.load_full().map(|p| (*p).clone()),
        )
    }

    fn resume_data(&self) -> Option<Bytes> {
        match &self.kind {
            KindState::Download(download) => download.resume_data.load_full().map(|d| (*d).clone()),
            _ => None,
        }
    }

    fn has_stream_handler(&self) -> bool {
        match &self.kind {
            KindState::Stream(stream) => stream
                .handler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some(),
            _ => false,
        }
    }
}

/// Handle to an in-flight request.
///
/// Cloning is cheap; every clone observes the same request. Methods that
/// change the request return `&Self` so they can be chained.
#[derive(Clone)]
pub struct Request {
    pub(crate) inner: Arc<RequestInner>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("task", &self.task_id())
            .field("kind", &self.inner.kind())
            .field("state", &self.state())
            .field("retry_count", &self.retry_count())
            .finish()
    }
}

impl Request {
    pub(crate) fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    /// Id of the current task, `None` if no task could be created
    pub fn task_id(&self) -> Option<TaskId> {
        self.inner.task_id()
    }

    /// Current state
    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    /// Kind of task this request runs
    pub fn kind(&self) -> TaskKind {
        self.inner.kind()
    }

    /// How many times the request was retried
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count()
    }

    /// Start and end of the last attempt
    pub fn timeline(&self) -> Timeline {
        self.inner.timeline()
    }

    /// Error of the request so far
    pub fn error(&self) -> Option<Error> {
        self.inner.error()
    }

    /// Response head of the last attempt
    pub fn response_head(&self) -> Option<ResponseHead> {
        self.inner.response_head()
    }

    /// The last request sent, after adaptation
    pub fn request(&self) -> Option<RequestDescriptor> {
        self.inner.request()
    }

    /// Metrics of the last attempt
    pub fn metrics(&self) -> Option<TaskMetrics> {
        self.inner.metrics()
    }

    /// Received bytes of the last attempt
    pub fn downloaded(&self) -> Progress {
        self.inner.downloaded()
    }

    /// Sent body bytes of the last attempt
    pub fn uploaded(&self) -> Progress {
        self.inner.uploaded()
    }

    /// Whether the request finished, successfully or not
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait until the request is finished
    pub async fn finished(&self) {
        self.inner.wait().await
    }

    /// Start or continue the request.
    ///
    /// A request whose task could not be created finishes immediately with
    /// its error.
    pub fn resume(&self) -> &Self {
        self.inner.resume();
        self
    }

    /// Pause the request
    pub fn suspend(&self) -> &Self {
        self.inner.suspend();
        self
    }

    /// Cancel the request. It still finishes, with [`Error::Cancelled`].
    pub fn cancel(&self) -> &Self {
        self.inner.cancel();
        self
    }

    /// Answer authentication challenges with `credential`
    pub fn authenticate(&self, credential: Credential) -> &Self {
        self.inner.credential.store(Some(Arc::new(credential)));
        self
    }

    /// Answer authentication challenges with a user and password
    pub fn authenticate_user(&self, user: &str, password: &str) -> &Self {
        self.authenticate(Credential::new(user, password))
    }

    /// Require a 2xx status and a content type accepted by the request
    pub fn validate(&self) -> &Self {
        self.inner.add_validation(validation::default_validation());
        self
    }

    /// Require one of the given status codes
    pub fn validate_status(&self, acceptable: impl IntoIterator<Item = u16>) -> &Self {
        self.inner
            .add_validation(validation::status_validation(acceptable.into_iter().collect()));
        self
    }

    /// Require a content type matching one of the given types
    pub fn validate_content_type<S: Into<String>>(&self, acceptable: impl IntoIterator<Item = S>) -> &Self {
        self.inner.add_validation(validation::content_type_validation(
            acceptable.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Add a custom validation
    pub fn validate_with<F>(&self, validation: F) -> &Self
    where
        F: Fn(&ValidationContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.add_validation(Arc::new(validation));
        self
    }

    /// Observe received bytes
    pub fn download_progress<F>(&self, handler: F) -> &Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        *self
            .inner
            .download_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
        self
    }

    /// Observe sent body bytes
    pub fn upload_progress<F>(&self, handler: F) -> &Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        *self
            .inner
            .upload_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
        self
    }
}

/// Re-exposes the chainable [`Request`] methods so they return the facade
macro_rules! chainable {
    ($facade:ty) => {
        impl $facade {
            /// See [`Request::resume`]
            pub fn resume(&self) -> &Self {
                $crate::request::Request::resume(self);
                self
            }

            /// See [`Request::suspend`]
            pub fn suspend(&self) -> &Self {
                $crate::request::Request::suspend(self);
                self
            }

            /// See [`Request::cancel`]
            pub fn cancel(&self) -> &Self {
                $crate::request::Request::cancel(self);
                self
            }

            /// See [`Request::authenticate`]
            pub fn authenticate(&self, credential: $crate::auth::Credential) -> &Self {
                $crate::request::Request::authenticate(self, credential);
                self
            }

            /// See [`Request::authenticate_user`]
            pub fn authenticate_user(&self, user: &str, password: &str) -> &Self {
                $crate::request::Request::authenticate_user(self, user, password);
                self
            }

            /// See [`Request::validate`]
            pub fn validate(&self) -> &Self {
                $crate::request::Request::validate(self);
                self
            }

            /// See [`Request::validate_status`]
            pub fn validate_status(&self, acceptable: impl IntoIterator<Item = u16>) -> &Self {
                $crate::request::Request::validate_status(self, acceptable);
                self
            }

            /// See [`Request::validate_content_type`]
            pub fn validate_content_type<S: Into<String>>(
                &self,
                acceptable: impl IntoIterator<Item = S>,
            ) -> &Self {
                $crate::request::Request::validate_content_type(self, acceptable);
                self
            }

            /// See [`Request::validate_with`]
            pub fn validate_with<F>(&self, validation: F) -> &Self
            where
                F: Fn(&$crate::validation::ValidationContext<'_>) -> $crate::Result<()>
                    + Send
                    + Sync
                    + 'static,
            {
                $crate::request::Request::validate_with(self, validation);
                self
            }

            /// See [`Request::download_progress`]
            pub fn download_progress<F>(&self, handler: F) -> &Self
            where
                F: Fn($crate::request::Progress) + Send + Sync + 'static,
            {
                $crate::request::Request::download_progress(self, handler);
                self
            }

            /// See [`Request::upload_progress`]
            pub fn upload_progress<F>(&self, handler: F) -> &Self
            where
                F: Fn($crate::request::Progress) + Send + Sync + 'static,
            {
                $crate::request::Request::upload_progress(self, handler);
                self
            }
        }
    };
}

pub(crate) use chainable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_fraction() {
        let progress = Progress {
            completed: 50,
            total: Some(200),
        };
        assert_eq!(progress.fraction(), Some(0.25));
        assert_eq!(Progress::default().fraction(), None);
        assert_eq!(
            Progress {
                completed: 0,
                total: Some(0)
            }
            .fraction(),
            Some(1.0)
        );
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            TaskState::Initialized,
            TaskState::Running,
            TaskState::Suspended,
            TaskState::Cancelled,
            TaskState::Completed,
        ] {
            assert_eq!(TaskState::from_u8(state as u8), state);
        }
    }
}
