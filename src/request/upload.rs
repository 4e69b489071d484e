use std::ops::Deref;

use super::{DataRequest, chainable};

/// A request sending a body from memory, a file or a stream.
///
/// The response is buffered like a [`DataRequest`]'s.
#[derive(Clone, Debug)]
pub struct UploadRequest(pub(crate) DataRequest);

impl Deref for UploadRequest {
    type Target = DataRequest;

    fn deref(&self) -> &DataRequest {
        &self.0
    }
}

chainable!(UploadRequest);
