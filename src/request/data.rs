use std::ops::Deref;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::{Request, chainable};
use crate::response::{
    DataResponse, DataSerializer, JsonSerializer, ResponseSerializer, StringSerializer,
};

/// A request whose response body is buffered in memory
#[derive(Clone, Debug)]
pub struct DataRequest(pub(crate) Request);

impl Deref for DataRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.0
    }
}

chainable!(DataRequest);

impl DataRequest {
    /// Wait for the request to finish and serialize the body with `serializer`
    pub async fn response_with<S: ResponseSerializer>(&self, serializer: S) -> DataResponse<S::Output> {
        let inner = &self.0.inner;
        inner.wait().await;

        let request = inner.request();
        let response = inner.response_head();
        let data = (!inner.has_stream_handler()).then(|| inner.data());
        let error = inner.error();
        let result = serializer.serialize(request.as_ref(), response.as_ref(), data.as_ref(), error.as_ref());

        DataResponse {
            request,
            response,
            data,
            result,
            metrics: inner.metrics(),
            timeline: inner.timeline(),
            retry_count: inner.retry_count(),
        }
    }

    /// Wait for the request to finish. The value is the raw body, if any.
    pub async fn response(&self) -> DataResponse<Option<Bytes>> {
        let inner = &self.0.inner;
        inner.wait().await;

        let data = (!inner.has_stream_handler()).then(|| inner.data());
        let result = match inner.error() {
            Some(error) => Err(error),
            None => Ok(data.clone()),
        };

        DataResponse {
            request: inner.request(),
            response: inner.response_head(),
            data,
            result,
            metrics: inner.metrics(),
            timeline: inner.timeline(),
            retry_count: inner.retry_count(),
        }
    }

    /// Wait for the request to finish and return the body
    pub async fn response_data(&self) -> DataResponse<Bytes> {
        self.response_with(DataSerializer).await
    }

    /// Wait for the request to finish and decode the body as text
    pub async fn response_string(&self) -> DataResponse<String> {
        self.response_with(StringSerializer).await
    }

    /// Wait for the request to finish and deserialize the body as JSON
    pub async fn response_json<T: DeserializeOwned>(&self) -> DataResponse<T> {
        self.response_with(JsonSerializer::<T>::default()).await
    }
}
