//! Backend abstraction over the transport substrate
//!
//! A backend owns the actual network machinery. The session only creates,
//! starts, pauses and cancels tasks through [`Backend`] and receives progress
//! and completion through [`BackendDelegate`].

pub mod types;

#[cfg(feature = "backend-reqwest")]
pub mod reqwest;

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;

use crate::descriptor::RequestDescriptor;
use crate::{Error, Result};
use types::{AuthChallenge, ChallengeDisposition, ResponseHead, TaskId, TaskMetrics, TransportTask};

/// Transport substrate used by a [`Session`](crate::Session).
///
/// Implementations must deliver [`BackendDelegate::did_complete`] at most once
/// per task, including for cancelled tasks, and must never call the delegate
/// while holding a lock that [`Backend::create_task`] also takes.
pub trait Backend: Send + Sync + 'static {
    /// Install the delegate receiving callbacks. Called once by the session.
    fn attach(&self, delegate: Arc<dyn BackendDelegate>);

    /// Create a suspended task
    fn create_task(&self, task: TransportTask) -> Result<TaskId>;

    /// Start or continue a task
    fn resume(&self, task: TaskId);

    /// Pause a running task
    fn suspend(&self, task: TaskId);

    /// Abort a task. Completion is still delivered with [`Error::Cancelled`].
    fn cancel(&self, task: TaskId);

    /// Abort a download task, returning data to continue it later
    fn cancel_producing_resume_data(&self, task: TaskId) -> Option<Bytes> {
        self.cancel(task);
        None
    }

    /// Send bytes over a stream task
    fn write(&self, task: TaskId, data: Bytes) -> Result<()> {
        let _ = (task, data);
        Err(Error::TaskCreationFailed(
            crate::error::TaskCreationFailureReason::Unsupported(types::TaskKind::Stream),
        ))
    }

    /// Stop accepting new tasks and let running ones finish
    fn invalidate(&self) {}
}

/// Callbacks a backend delivers for its tasks.
///
/// Callbacks for one task are delivered in order; callbacks for different
/// tasks may arrive concurrently from any thread.
pub trait BackendDelegate: Send + Sync {
    /// The response head arrived
    fn did_receive_response(&self, task: TaskId, response: ResponseHead);

    /// A chunk of the response body arrived
    fn did_receive_data(&self, task: TaskId, data: Bytes);

    /// Request body bytes were sent
    fn did_send_body_data(
        &self,
        task: TaskId,
        bytes_sent: u64,
        total_bytes_sent: u64,
        total_expected: Option<u64>,
    ) {
        let _ = (task, bytes_sent, total_bytes_sent, total_expected);
    }

    /// Download body bytes were written to the temporary file
    fn did_write_data(
        &self,
        task: TaskId,
        bytes_written: u64,
        total_bytes_written: u64,
        total_expected: Option<u64>,
    ) {
        let _ = (task, bytes_written, total_bytes_written, total_expected);
    }

    /// A download finished writing its temporary file. The delegate may move it.
    fn did_finish_downloading(&self, task: TaskId, location: PathBuf) {
        let _ = (task, location);
    }

    /// The server requested authentication
    fn did_receive_challenge(
        &self,
        task: TaskId,
        challenge: &AuthChallenge,
    ) -> ChallengeDisposition {
        let _ = (task, challenge);
        ChallengeDisposition::PerformDefaultHandling
    }

    /// A redirect was received. Returning `None` stops at the redirect response.
    fn will_perform_redirection(
        &self,
        task: TaskId,
        response: &ResponseHead,
        request: RequestDescriptor,
    ) -> Option<RequestDescriptor> {
        let _ = (task, response);
        Some(request)
    }

    /// Metrics for the task are available
    fn did_finish_collecting_metrics(&self, task: TaskId, metrics: TaskMetrics) {
        let _ = (task, metrics);
    }

    /// The task finished, with the transport error if any
    fn did_complete(&self, task: TaskId, error: Option<Error>);
}
