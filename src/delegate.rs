//! Backend callback dispatch
//!
//! The [`SessionDelegate`] receives every backend callback, finds the
//! request owning the task and routes the callback through a fixed priority
//! table: a session-level handler installed on the builder wins, then the
//! request's own state, then the default behavior.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;

use crate::Error;
use crate::backend::BackendDelegate;
use crate::backend::types::{
    AuthChallenge, ChallengeDisposition, ResponseHead, TaskId, TaskMetrics,
};
use crate::descriptor::RequestDescriptor;
use crate::events::{EventBus, LifecycleEventKind};
use crate::registry::TaskRegistry;
use crate::request::{Request, RequestInner};
use crate::retry::{RequestRetrier, RetryCompletion};
use crate::session::{Session, SessionInner};

/// Session-level handler for finished tasks, called before the request finishes
pub(crate) type TaskCompletionHandler = Arc<dyn Fn(TaskId, Option<&Error>) + Send + Sync>;

/// Session-level redirect handler. Returning `None` stops at the redirect.
pub(crate) type RedirectHandler =
    Arc<dyn Fn(TaskId, &ResponseHead, RequestDescriptor) -> Option<RequestDescriptor> + Send + Sync>;

/// Session-level challenge handler
pub(crate) type ChallengeHandler = Arc<dyn Fn(TaskId, &AuthChallenge) -> ChallengeDisposition + Send + Sync>;

/// Handlers taking precedence over per-request behavior
#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub(crate) task_did_complete: Option<TaskCompletionHandler>,
    pub(crate) task_will_perform_redirection: Option<RedirectHandler>,
    pub(crate) task_did_receive_challenge: Option<ChallengeHandler>,
}

pub(crate) struct SessionDelegate {
    this: Weak<SessionDelegate>,
    session: Weak<SessionInner>,
    pub(crate) registry: TaskRegistry<RequestInner>,
    events: EventBus,
    handlers: Handlers,
    pending_retries: AtomicUsize,
    runtime: Handle,
}

impl SessionDelegate {
    pub(crate) fn new(
        session: Weak<SessionInner>,
        events: EventBus,
        handlers: Handlers,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            session,
            registry: TaskRegistry::default(),
            events,
            handlers,
            pending_retries: AtomicUsize::new(0),
            runtime,
        })
    }

    pub(crate) fn pending_retries(&self) -> usize {
        self.pending_retries.load(Ordering::Acquire)
    }

    /// Finish `request`, whose last task was `task`.
    ///
    /// `error` is only recorded if the request has none yet.
    pub(crate) fn finalize(&self, request: &Arc<RequestInner>, task: TaskId, error: Option<Error>) {
        if let Some(error) = error {
            request.set_error_if_absent(error);
        }
        let error = request.error();

        if let Some(handler) = &self.handlers.task_did_complete {
            handler(task, error.as_ref());
        }
        self.registry.remove(task);
        self.events.publish(LifecycleEventKind::Completed, task);

        match &error {
            Some(error) => tracing::debug!(%task, %error, "request failed"),
            None => tracing::debug!(%task, "request succeeded"),
        }
        request.finish();
    }

    fn consult_retrier(
        &self,
        session: Arc<SessionInner>,
        retrier: Arc<dyn RequestRetrier>,
        request: Arc<RequestInner>,
        task: TaskId,
        error: Error,
    ) {
        let Some(delegate) = self.this.upgrade() else {
            return;
        };
        let weak_session = Arc::downgrade(&session);
        let handle = Request::from_inner(request.clone());
        let reported = error.clone();

        let completion = RetryCompletion::new(move |decision| {
            if decision.should_retry {
                delegate.schedule_retry(weak_session, request, task, decision.delay);
            } else {
                delegate.finalize(&request, task, Some(error));
            }
        });

        retrier.should(&Session::from_inner(session), &handle, &reported, completion);
    }

    fn schedule_retry(
        self: Arc<Self>,
        session: Weak<SessionInner>,
        request: Arc<RequestInner>,
        task: TaskId,
        delay: Duration,
    ) {
        self.pending_retries.fetch_add(1, Ordering::AcqRel);
        let runtime = self.runtime.clone();

        runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.pending_retries.fetch_sub(1, Ordering::AcqRel);

            let Some(session) = session.upgrade() else {
                tracing::debug!(%task, "session dropped before retry, abandoning request");
                self.registry.remove(task);
                request.finish();
                return;
            };

            if request.is_cancelled() {
                request.set_error(Error::Cancelled);
                self.finalize(&request, task, None);
                return;
            }

            Session::from_inner(session).retry(&request, task);
        });
    }
}

impl BackendDelegate for SessionDelegate {
    fn did_receive_response(&self, task: TaskId, response: ResponseHead) {
        if let Some(request) = self.registry.get(task) {
            request.did_receive_response(response);
        }
    }

    fn did_receive_data(&self, task: TaskId, data: Bytes) {
        if let Some(request) = self.registry.get(task) {
            request.did_receive_data(data);
        }
    }

    fn did_send_body_data(
        &self,
        task: TaskId,
        _bytes_sent: u64,
        total_bytes_sent: u64,
        total_expected: Option<u64>,
    ) {
        if let Some(request) = self.registry.get(task) {
            request.did_send_body_data(total_bytes_sent, total_expected);
        }
    }

    fn did_write_data(
        &self,
        task: TaskId,
        _bytes_written: u64,
        total_bytes_written: u64,
        total_expected: Option<u64>,
    ) {
        if let Some(request) = self.registry.get(task) {
            request.did_write_data(total_bytes_written, total_expected);
        }
    }

    fn did_finish_downloading(&self, task: TaskId, location: PathBuf) {
        if let Some(request) = self.registry.get(task) {
            request.did_finish_downloading(location);
        }
    }

    fn did_receive_challenge(&self, task: TaskId, challenge: &AuthChallenge) -> ChallengeDisposition {
        if let Some(handler) = &self.handlers.task_did_receive_challenge {
            return handler(task, challenge);
        }
        match self.registry.get(task) {
            Some(request) => request.challenge_disposition(challenge),
            None => ChallengeDisposition::PerformDefaultHandling,
        }
    }

    fn will_perform_redirection(
        &self,
        task: TaskId,
        response: &ResponseHead,
        request: RequestDescriptor,
    ) -> Option<RequestDescriptor> {
        match &self.handlers.task_will_perform_redirection {
            Some(handler) => handler(task, response, request),
            None => Some(request),
        }
    }

    fn did_finish_collecting_metrics(&self, task: TaskId, metrics: TaskMetrics) {
        if let Some(request) = self.registry.get(task) {
            request.did_finish_collecting_metrics(metrics);
        }
    }

    fn did_complete(&self, task: TaskId, error: Option<Error>) {
        let Some(request) = self.registry.get(task) else {
            tracing::debug!(%task, "completion for unregistered task");
            if let Some(handler) = &self.handlers.task_did_complete {
                handler(task, error.as_ref());
            }
            self.events.publish(LifecycleEventKind::Completed, task);
            return;
        };

        request.mark_end();
        request.validate_response();

        let Some(error) = request.error().or(error) else {
            self.finalize(&request, task, None);
            return;
        };

        if request.is_cancelled() {
            self.finalize(&request, task, Some(error));
            return;
        }

        let Some(session) = self.session.upgrade() else {
            self.finalize(&request, task, Some(error));
            return;
        };
        let Some(retrier) = session.config.retrier.clone() else {
            self.finalize(&request, task, Some(error));
            return;
        };

        // Kept on the wrapper so an abandoned retry still finishes with it
        request.set_error_if_absent(error.clone());
        tracing::debug!(%task, %error, "consulting retrier");
        self.consult_retrier(session, retrier, request, task, error);
    }
}
