//! In-memory backend replaying scripted replies

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode, header};
use tether::backend::types::{ResponseHead, TaskId, TaskMetrics, TransportTask};
use tether::backend::{Backend, BackendDelegate};
use tether::{Error, RequestDescriptor, Result};
use url::Url;

/// What the backend answers for one task
#[derive(Clone, Debug)]
pub enum Reply {
    /// Respond with a status, content type and body
    Response {
        status: u16,
        content_type: Option<&'static str>,
        body: Bytes,
    },
    /// Fail without a response
    Fail(Error),
    /// Never complete unless cancelled
    Hang,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Response {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    pub fn json(status: u16, body: &'static str) -> Self {
        Reply::Response {
            status,
            content_type: Some("application/json"),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    pub fn text(status: u16, body: &'static str) -> Self {
        Reply::Response {
            status,
            content_type: Some("text/plain; charset=utf-8"),
            body: Bytes::from_static(body.as_bytes()),
        }
    }
}

pub struct ScriptedBackend {
    this: Weak<ScriptedBackend>,
    delegate: OnceLock<Arc<dyn BackendDelegate>>,
    next_id: AtomicU64,
    replies: Mutex<VecDeque<Reply>>,
    pending: Mutex<HashMap<TaskId, TransportTask>>,
    live: Mutex<HashSet<TaskId>>,
    sent: Mutex<Vec<RequestDescriptor>>,
    pub created: AtomicUsize,
    pub resumed: AtomicUsize,
    pub suspended: AtomicUsize,
    pub cancelled: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        let replies = replies.into_iter().collect();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            delegate: OnceLock::new(),
            next_id: AtomicU64::new(1),
            replies: Mutex::new(replies),
            pending: Mutex::new(HashMap::new()),
            live: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
            resumed: AtomicUsize::new(0),
            suspended: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        })
    }

    /// Requests handed to the backend, in creation order
    pub fn sent(&self) -> Vec<RequestDescriptor> {
        self.sent.lock().unwrap().clone()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn live_tasks(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    fn delegate(&self) -> Arc<dyn BackendDelegate> {
        self.delegate.get().expect("backend not attached").clone()
    }

    fn complete(&self, task: TaskId, error: Option<Error>) {
        if !self.live.lock().unwrap().remove(&task) {
            return;
        }
        let delegate = self.delegate();
        delegate.did_finish_collecting_metrics(task, TaskMetrics::default());
        delegate.did_complete(task, error);
    }

    fn deliver(&self, task: TaskId, transport: TransportTask, reply: Reply) {
        let delegate = self.delegate();
        let url = transport
            .request()
            .map(|request| request.url.clone())
            .unwrap_or_else(|| Url::parse("https://resumed.invalid/file").unwrap());

        match reply {
            Reply::Hang => {}
            Reply::Fail(error) => self.complete(task, Some(error)),
            Reply::Response {
                status,
                content_type,
                body,
            } => {
                let mut headers = HeaderMap::new();
                if let Some(content_type) = content_type {
                    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
                }
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
                let head = ResponseHead::new(StatusCode::from_u16(status).unwrap(), headers, url);
                delegate.did_receive_response(task, head);

                match transport {
                    TransportTask::Download { .. } | TransportTask::DownloadResuming { .. } => {
                        let path = tempfile::NamedTempFile::new()
                            .unwrap()
                            .into_temp_path()
                            .keep()
                            .unwrap();
                        std::fs::write(&path, &body).unwrap();
                        let length = body.len() as u64;
                        delegate.did_write_data(task, length, length, Some(length));
                        delegate.did_finish_downloading(task, path);
                    }
                    _ => {
                        if !body.is_empty() {
                            delegate.did_receive_data(task, body);
                        }
                    }
                }
                self.complete(task, None);
            }
        }
    }
}

impl Backend for ScriptedBackend {
    fn attach(&self, delegate: Arc<dyn BackendDelegate>) {
        let _ = self.delegate.set(delegate);
    }

    fn create_task(&self, task: TransportTask) -> Result<TaskId> {
        let id = TaskId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        if let Some(request) = task.request() {
            self.sent.lock().unwrap().push(request.clone());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().insert(id, task);
        self.live.lock().unwrap().insert(id);
        Ok(id)
    }

    fn resume(&self, task: TaskId) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
        let Some(transport) = self.pending.lock().unwrap().remove(&task) else {
            return;
        };
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::status(200));

        // Callbacks arrive on a runtime task, like a real transport's
        let this = self.this.upgrade().expect("backend alive");
        tokio::spawn(async move { this.deliver(task, transport, reply) });
    }

    fn suspend(&self, _task: TaskId) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(&self, task: TaskId) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().remove(&task);
        let this = self.this.upgrade().expect("backend alive");
        tokio::spawn(async move { this.complete(task, Some(Error::Cancelled)) });
    }
}
