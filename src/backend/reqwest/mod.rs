//! Reqwest backend for cross-platform HTTP support
//!
//! Every task runs as a tokio task driven by a control channel. Redirects
//! and authentication challenges are handled here rather than by reqwest so
//! the session delegate gets to decide them.

mod stream;
mod transfer;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::auth::Credential;
use crate::backend::types::{TaskId, TaskKind, TaskMetrics, TransportTask};
use crate::backend::{Backend, BackendDelegate};
use crate::error::TaskCreationFailureReason;
use crate::{Error, Result};

use transfer::{DownloadCheckpoint, ResumeData};

/// Desired state of a running task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Cancel { keep_partial: bool },
}

/// How a task was cancelled
#[derive(Debug, Clone, Copy)]
struct Cancelled {
    keep_partial: bool,
}

impl Cancelled {
    const DISCARD: Cancelled = Cancelled {
        keep_partial: false,
    };
}

/// Wait while the task is paused. Returns the cancellation if there is one.
async fn checkpoint(control: &mut watch::Receiver<Control>) -> Option<Cancelled> {
    loop {
        let state = *control.borrow_and_update();
        match state {
            Control::Run => return None,
            Control::Cancel { keep_partial } => return Some(Cancelled { keep_partial }),
            Control::Pause => {
                if control.changed().await.is_err() {
                    return Some(Cancelled::DISCARD);
                }
            }
        }
    }
}

/// Resolves once the task is cancelled
async fn cancellation(control: &mut watch::Receiver<Control>) -> Cancelled {
    loop {
        if let Control::Cancel { keep_partial } = *control.borrow_and_update() {
            return Cancelled { keep_partial };
        }
        if control.changed().await.is_err() {
            return Cancelled::DISCARD;
        }
    }
}

struct TaskEntry {
    kind: TaskKind,
    control: watch::Sender<Control>,
    /// Taken on first resume
    pending: Option<(TransportTask, watch::Receiver<Control>)>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    reader: Option<mpsc::UnboundedReceiver<Bytes>>,
    download: Option<Arc<Mutex<Option<DownloadCheckpoint>>>>,
}

pub(crate) struct Shared {
    client: reqwest::Client,
    runtime: Handle,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    delegate: OnceLock<Arc<dyn BackendDelegate>>,
    credentials: Mutex<HashMap<String, Credential>>,
    invalidated: AtomicBool,
}

impl Shared {
    fn tasks(&self) -> MutexGuard<'_, HashMap<TaskId, TaskEntry>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn delegate(&self) -> Option<&Arc<dyn BackendDelegate>> {
        self.delegate.get()
    }

    pub(crate) fn stored_credential(&self, space: &str) -> Option<Credential> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(space)
            .cloned()
    }

    pub(crate) fn store_credential(&self, space: String, credential: Credential) {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(space, credential);
    }

    /// Release the task and report its completion
    pub(crate) fn complete(&self, task: TaskId, metrics: Option<TaskMetrics>, error: Option<Error>) {
        self.tasks().remove(&task);
        let Some(delegate) = self.delegate() else {
            return;
        };
        if let Some(metrics) = metrics {
            delegate.did_finish_collecting_metrics(task, metrics);
        }
        match &error {
            Some(error) => tracing::debug!(%task, %error, "task failed"),
            None => tracing::debug!(%task, "task finished"),
        }
        delegate.did_complete(task, error);
    }
}

/// Reqwest backend for cross-platform HTTP
#[derive(Clone)]
pub struct ReqwestBackend {
    shared: Arc<Shared>,
}

impl ReqwestBackend {
    /// Create a new Reqwest backend.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create reqwest client: {}", e)))?;
        Self::with_client(client)
    }

    /// Create a backend sending through `client`.
    ///
    /// The client should not follow redirects itself, otherwise redirect
    /// handlers are never consulted.
    pub fn with_client(client: reqwest::Client) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;
        Ok(Self {
            shared: Arc::new(Shared {
                client,
                runtime,
                next_id: AtomicU64::new(1),
                tasks: Mutex::new(HashMap::new()),
                delegate: OnceLock::new(),
                credentials: Mutex::new(HashMap::new()),
                invalidated: AtomicBool::new(false),
            }),
        })
    }

    /// Get the underlying reqwest client
    pub fn client(&self) -> &reqwest::Client {
        &self.shared.client
    }

    fn cancel_task(&self, task: TaskId, keep_partial: bool) -> Option<Bytes> {
        let (resume_data, never_started) = {
            let mut tasks = self.shared.tasks();
            let entry = tasks.get_mut(&task)?;

            if entry.pending.is_some() {
                tasks.remove(&task);
                (None, true)
            } else {
                let resume_data = if keep_partial {
                    entry
                        .download
                        .as_ref()
                        .and_then(|d| d.lock().unwrap_or_else(PoisonError::into_inner).clone())
                        .and_then(|checkpoint| ResumeData::from(checkpoint).encode())
                } else {
                    None
                };
                let _ = entry.control.send(Control::Cancel {
                    keep_partial: resume_data.is_some(),
                });
                (resume_data, false)
            }
        };

        if never_started {
            let shared = self.shared.clone();
            self.shared.runtime.spawn(async move {
                shared.complete(task, None, Some(Error::Cancelled));
            });
        }
        resume_data
    }
}

impl Backend for ReqwestBackend {
    fn attach(&self, delegate: Arc<dyn BackendDelegate>) {
        if self.shared.delegate.set(delegate).is_err() {
            tracing::warn!("backend already attached to a session, ignoring");
        }
    }

    fn create_task(&self, task: TransportTask) -> Result<TaskId> {
        if self.shared.invalidated.load(Ordering::Acquire) {
            return Err(Error::TaskCreationFailed(TaskCreationFailureReason::Invalidated));
        }
        if let TransportTask::DownloadResuming { resume_data } = &task {
            ResumeData::decode(resume_data)?;
        }

        let id = TaskId::new(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        let kind = task.kind();
        let (control, receiver) = watch::channel(Control::Pause);
        let (writer, reader) = match kind {
            TaskKind::Stream => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            _ => (None, None),
        };
        let download = (kind == TaskKind::Download).then(|| Arc::new(Mutex::new(None)));

        self.shared.tasks().insert(
            id,
            TaskEntry {
                kind,
                control,
                pending: Some((task, receiver)),
                writer,
                reader,
                download,
            },
        );
        tracing::trace!(task = %id, ?kind, "task created");
        Ok(id)
    }

    fn resume(&self, task: TaskId) {
        let start = {
            let mut tasks = self.shared.tasks();
            let Some(entry) = tasks.get_mut(&task) else {
                return;
            };
            let _ = entry.control.send(Control::Run);
            entry.pending.take().map(|(transport, control)| {
                (transport, control, entry.reader.take(), entry.download.clone())
            })
        };

        let Some((transport, control, reader, download)) = start else {
            return;
        };
        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            match transport {
                TransportTask::Stream { host, port } => {
                    let reader = reader.unwrap_or_else(|| mpsc::unbounded_channel().1);
                    stream::run(shared, task, host, port, reader, control).await
                }
                transport => transfer::run(shared, task, transport, download, control).await,
            }
        });
    }

    fn suspend(&self, task: TaskId) {
        if let Some(entry) = self.shared.tasks().get(&task) {
            let _ = entry.control.send(Control::Pause);
        }
    }

    fn cancel(&self, task: TaskId) {
        self.cancel_task(task, false);
    }

    fn cancel_producing_resume_data(&self, task: TaskId) -> Option<Bytes> {
        self.cancel_task(task, true)
    }

    fn write(&self, task: TaskId, data: Bytes) -> Result<()> {
        let tasks = self.shared.tasks();
        let Some(entry) = tasks.get(&task) else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed").into());
        };
        match &entry.writer {
            Some(writer) => writer
                .send(data)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "stream is closed").into()),
            None => Err(Error::TaskCreationFailed(TaskCreationFailureReason::Unsupported(
                entry.kind,
            ))),
        }
    }

    fn invalidate(&self) {
        self.shared.invalidated.store(true, Ordering::Release);
    }
}

/// Map a reqwest failure onto the error taxonomy
pub(crate) fn map_error(error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout
    } else {
        Error::Network {
            code: -1,
            message: format!("Request failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pause_then_cancel() {
        let (tx, mut rx) = watch::channel(Control::Pause);
        let waiter = tokio::spawn(async move { checkpoint(&mut rx).await });
        tx.send(Control::Cancel { keep_partial: true }).unwrap();
        let cancelled = waiter.await.unwrap().expect("cancelled");
        assert!(cancelled.keep_partial);
    }

    #[tokio::test]
    async fn running_passes_checkpoint() {
        let (_tx, mut rx) = watch::channel(Control::Run);
        assert!(checkpoint(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn invalidated_backend_rejects_tasks() {
        let backend = ReqwestBackend::new().unwrap();
        backend.invalidate();
        let result = backend.create_task(TransportTask::Stream {
            host: "localhost".into(),
            port: 1,
        });
        assert!(matches!(
            result,
            Err(Error::TaskCreationFailed(TaskCreationFailureReason::Invalidated))
        ));
    }

    #[tokio::test]
    async fn write_to_data_task_is_unsupported() {
        let backend = ReqwestBackend::new().unwrap();
        let request =
            crate::RequestDescriptor::parse(http::Method::GET, "http://localhost/").unwrap();
        let task = backend.create_task(TransportTask::Data { request }).unwrap();
        assert!(matches!(
            backend.write(task, Bytes::from_static(b"x")),
            Err(Error::TaskCreationFailed(TaskCreationFailureReason::Unsupported(TaskKind::Data)))
        ));
    }

    #[tokio::test]
    async fn garbage_resume_data_is_rejected() {
        let backend = ReqwestBackend::new().unwrap();
        let result = backend.create_task(TransportTask::DownloadResuming {
            resume_data: Bytes::from_static(b"not json"),
        });
        assert!(matches!(
            result,
            Err(Error::TaskCreationFailed(TaskCreationFailureReason::InvalidResumeData))
        ));
    }
}
