use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use http::{HeaderMap, HeaderValue, header};
use tokio::runtime::Handle;

use super::{Session, SessionInner};
use crate::adapter::RequestAdapter;
use crate::backend::Backend;
use crate::backend::types::{AuthChallenge, ChallengeDisposition, ResponseHead, TaskId};
use crate::delegate::{Handlers, SessionDelegate};
use crate::descriptor::{RequestDescriptor, parse_header};
use crate::events::EventBus;
use crate::multipart::DEFAULT_MEMORY_THRESHOLD;
use crate::retry::RequestRetrier;
use crate::{Error, Result};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Settings shared by every request of a [`Session`]
#[derive(Clone)]
pub struct SessionConfig {
    /// Headers added to every request that does not set them itself
    pub default_headers: HeaderMap,
    /// Start requests as soon as they are created
    pub start_requests_immediately: bool,
    /// Adapter applied to every request before its task is created
    pub adapter: Option<Arc<dyn RequestAdapter>>,
    /// Retrier consulted when a request fails
    pub retrier: Option<Arc<dyn RequestRetrier>>,
    /// Multipart bodies larger than this are encoded to a temporary file
    pub multipart_memory_threshold: u64,
    /// Timeout for requests that do not set their own
    pub timeout: Option<Duration>,
    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(concat!("tether/", env!("CARGO_PKG_VERSION"))),
        );

        Self {
            default_headers,
            start_requests_immediately: true,
            adapter: None,
            retrier: None,
            multipart_memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            timeout: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("default_headers", &self.default_headers)
            .field("start_requests_immediately", &self.start_requests_immediately)
            .field("adapter", &self.adapter.is_some())
            .field("retrier", &self.retrier.is_some())
            .field("multipart_memory_threshold", &self.multipart_memory_threshold)
            .field("timeout", &self.timeout)
            .field("event_capacity", &self.event_capacity)
            .finish()
    }
}

impl SessionConfig {
    /// Fill in default headers and timeout the request does not set itself
    pub(crate) fn apply_defaults(&self, mut request: RequestDescriptor) -> RequestDescriptor {
        for (name, value) in &self.default_headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        if request.timeout.is_none() {
            request.timeout = self.timeout;
        }
        request
    }
}

/// Builder for creating sessions
pub struct SessionBuilder {
    config: SessionConfig,
    headers: Vec<(String, String)>,
    backend: Option<Arc<dyn Backend>>,
    handlers: Handlers,
}

impl SessionBuilder {
    /// Create a new session builder
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
            headers: Vec::new(),
            backend: None,
            handlers: Handlers::default(),
        }
    }

    /// Use `backend` instead of the default transport
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Adapt every request before its task is created
    pub fn adapter(mut self, adapter: impl RequestAdapter + 'static) -> Self {
        self.config.adapter = Some(Arc::new(adapter));
        self
    }

    /// Consult `retrier` when a request fails
    pub fn retrier(mut self, retrier: impl RequestRetrier + 'static) -> Self {
        self.config.retrier = Some(Arc::new(retrier));
        self
    }

    /// Add a default header
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set user agent
    pub fn user_agent(self, user_agent: impl Into<String>) -> Self {
        self.default_header(header::USER_AGENT.as_str(), user_agent)
    }

    /// Whether requests start as soon as they are created. Defaults to true.
    pub fn start_requests_immediately(mut self, start: bool) -> Self {
        self.config.start_requests_immediately = start;
        self
    }

    /// Encode larger multipart bodies to a temporary file
    pub fn multipart_memory_threshold(mut self, bytes: u64) -> Self {
        self.config.multipart_memory_threshold = bytes;
        self
    }

    /// Set request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Buffer size of the lifecycle event channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Called for every finished task before its request finishes
    pub fn on_task_complete<F>(mut self, handler: F) -> Self
    where
        F: Fn(TaskId, Option<&Error>) + Send + Sync + 'static,
    {
        self.handlers.task_did_complete = Some(Arc::new(handler));
        self
    }

    /// Decide redirects. Returning `None` stops at the redirect response.
    pub fn on_redirect<F>(mut self, handler: F) -> Self
    where
        F: Fn(TaskId, &ResponseHead, RequestDescriptor) -> Option<RequestDescriptor>
            + Send
            + Sync
            + 'static,
    {
        self.handlers.task_will_perform_redirection = Some(Arc::new(handler));
        self
    }

    /// Answer authentication challenges for every request
    pub fn on_challenge<F>(mut self, handler: F) -> Self
    where
        F: Fn(TaskId, &AuthChallenge) -> ChallengeDisposition + Send + Sync + 'static,
    {
        self.handlers.task_did_receive_challenge = Some(Arc::new(handler));
        self
    }

    /// Build the session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Session> {
        let runtime = Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;

        let mut config = self.config;
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            config.default_headers.insert(name, value);
        }

        let backend = match self.backend {
            Some(backend) => backend,
            None => default_backend()?,
        };
        let events = EventBus::new(config.event_capacity);
        let handlers = self.handlers;

        let inner = Arc::new_cyclic(|session: &Weak<SessionInner>| {
            let delegate =
                SessionDelegate::new(session.clone(), events.clone(), handlers, runtime.clone());
            SessionInner {
                backend: backend.clone(),
                delegate,
                config,
                events,
            }
        });
        backend.attach(inner.delegate.clone());

        tracing::debug!(config = ?inner.config, "session created");
        Ok(Session { inner })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "backend-reqwest")]
fn default_backend() -> Result<Arc<dyn Backend>> {
    Ok(Arc::new(crate::backend::reqwest::ReqwestBackend::new()?))
}

#[cfg(not(feature = "backend-reqwest"))]
fn default_backend() -> Result<Arc<dyn Backend>> {
    Err(Error::Internal(
        "no backend configured and the reqwest backend is disabled".to_string(),
    ))
}
