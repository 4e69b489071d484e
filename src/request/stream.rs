use std::ops::Deref;
use std::sync::{Arc, PoisonError};

use bytes::Bytes;

use super::{DataRequest, KindState, chainable};
use crate::error::TaskCreationFailureReason;
use crate::{Error, Result};

/// A bidirectional byte stream to a host.
///
/// Received bytes are buffered unless a handler is installed with
/// [`on_data`](Self::on_data).
#[derive(Clone, Debug)]
pub struct StreamRequest(pub(crate) DataRequest);

impl Deref for StreamRequest {
    type Target = DataRequest;

    fn deref(&self) -> &DataRequest {
        &self.0
    }
}

chainable!(StreamRequest);

impl StreamRequest {
    /// Deliver received bytes to `handler` instead of buffering them
    pub fn on_data<F>(&self, handler: F) -> &Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        if let KindState::Stream(stream) = &self.0.0.inner.kind {
            *stream.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
        }
        self
    }

    /// Send bytes to the host
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        let inner = &self.0.0.inner;
        if let Some(error) = inner.error() {
            return Err(error);
        }
        let task = inner.task_id().ok_or(Error::TaskCreationFailed(
            TaskCreationFailureReason::NotRecreatable,
        ))?;
        inner.backend.write(task, data.into())
    }
}
