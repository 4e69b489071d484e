//! Request adaptation

use crate::Result;
use crate::descriptor::RequestDescriptor;

/// Mutates every request before a task is created for it.
///
/// The adapter runs again for every retry, so headers it injects (tokens,
/// signatures) are recomputed for each attempt.
///
/// ```rust
/// use tether::{RequestAdapter, RequestDescriptor};
///
/// let adapter = |mut request: RequestDescriptor| -> tether::Result<RequestDescriptor> {
///     request.set_header("Authorization", "Bearer token")?;
///     Ok(request)
/// };
/// let request = RequestDescriptor::parse(http::Method::GET, "https://example.com").unwrap();
/// let adapted = adapter.adapt(request).unwrap();
/// assert_eq!(adapted.header("authorization"), Some("Bearer token"));
/// ```
pub trait RequestAdapter: Send + Sync {
    /// Return the request to send. Failures become the request's error,
    /// see [`Error::adaptation`](crate::Error::adaptation).
    fn adapt(&self, request: RequestDescriptor) -> Result<RequestDescriptor>;
}

impl<F> RequestAdapter for F
where
    F: Fn(RequestDescriptor) -> Result<RequestDescriptor> + Send + Sync,
{
    fn adapt(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        self(request)
    }
}
