use std::fmt;
use std::io;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use super::{Request, chainable};
use crate::backend::types::ResponseHead;
use crate::error::ResponseSerializationFailureReason;
use crate::response::{
    DataSerializer, DownloadResponse, JsonSerializer, ResponseSerializer, StringSerializer,
};
use crate::{Error, Result};

/// How a finished download is moved into place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadOptions {
    /// Create missing parent directories of the destination
    pub create_intermediate_directories: bool,
    /// Replace an existing file at the destination
    pub remove_previous_file: bool,
}

type Resolve = dyn Fn(&Path, &ResponseHead) -> (PathBuf, DownloadOptions) + Send + Sync;

/// Where a finished download goes.
///
/// The closure receives the temporary file and the response and returns the
/// final path.
#[derive(Clone)]
pub struct Destination(Arc<Resolve>);

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Destination(..)")
    }
}

impl Destination {
    /// Decide the destination from the temporary file and the response
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(&Path, &ResponseHead) -> (PathBuf, DownloadOptions) + Send + Sync + 'static,
    {
        Self(Arc::new(resolve))
    }

    /// Always move to `path`, replacing any file there
    pub fn to_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self::new(move |_, _| {
            (
                path.clone(),
                DownloadOptions {
                    create_intermediate_directories: true,
                    remove_previous_file: true,
                },
            )
        })
    }

    /// Move into `directory`, named after the last segment of the response URL
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        let directory = directory.into();
        Self::new(move |_, response| {
            let name = response
                .url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .unwrap_or("download");
            (
                directory.join(name),
                DownloadOptions {
                    create_intermediate_directories: true,
                    remove_previous_file: true,
                },
            )
        })
    }

    pub(crate) fn resolve(&self, temporary: &Path, response: &ResponseHead) -> (PathBuf, DownloadOptions) {
        (self.0)(temporary, response)
    }
}

pub(crate) fn move_file(from: &Path, to: &Path, options: DownloadOptions) -> io::Result<()> {
    if options.create_intermediate_directories {
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    if options.remove_previous_file && to.exists() {
        std::fs::remove_file(to)?;
    }
    if std::fs::rename(from, to).is_err() {
        // Across filesystems
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}

/// A request whose response body is written to a file
#[derive(Clone, Debug)]
pub struct DownloadRequest(pub(crate) Request);

impl Deref for DownloadRequest {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.0
    }
}

chainable!(DownloadRequest);

impl DownloadRequest {
    /// Data to continue the download with, available after [`cancel`](Self::cancel)
    pub fn resume_data(&self) -> Option<Bytes> {
        self.0.inner.resume_data()
    }

    fn response_parts<T>(&self, result: Result<T>) -> DownloadResponse<T> {
        let inner = &self.0.inner;
        let (temporary_path, destination_path) = inner.file_path();
        DownloadResponse {
            request: inner.request(),
            response: inner.response_head(),
            temporary_path,
            destination_path,
            resume_data: inner.resume_data(),
            result,
            metrics: inner.metrics(),
            timeline: inner.timeline(),
            retry_count: inner.retry_count(),
        }
    }

    /// Wait for the download to finish. The value is the file's location.
    pub async fn response(&self) -> DownloadResponse<Option<PathBuf>> {
        let inner = &self.0.inner;
        inner.wait().await;

        let result = match inner.error() {
            Some(error) => Err(error),
            None => {
                let (temporary, destination) = inner.file_path();
                Ok(destination.or(temporary))
            }
        };
        self.response_parts(result)
    }

    /// Wait for the download to finish and serialize the file with `serializer`
    pub async fn response_with<S: ResponseSerializer>(&self, serializer: S) -> DownloadResponse<S::Output> {
        let inner = &self.0.inner;
        inner.wait().await;

        let request = inner.request();
        let response = inner.response_head();
        let result = match inner.error() {
            Some(error) => serializer.serialize(request.as_ref(), response.as_ref(), None, Some(&error)),
            None => {
                let (temporary, destination) = inner.file_path();
                match destination.or(temporary) {
                    None => Err(Error::ResponseSerializationFailed(
                        ResponseSerializationFailureReason::InputDataNil,
                    )),
                    Some(path) => match tokio::fs::read(&path).await {
                        Ok(data) => serializer.serialize(
                            request.as_ref(),
                            response.as_ref(),
                            Some(&Bytes::from(data)),
                            None,
                        ),
                        Err(error) => Err(error.into()),
                    },
                }
            }
        };
        self.response_parts(result)
    }

    /// Wait for the download to finish and read the file
    pub async fn response_data(&self) -> DownloadResponse<Bytes> {
        self.response_with(DataSerializer).await
    }

    /// Wait for the download to finish and decode the file as text
    pub async fn response_string(&self) -> DownloadResponse<String> {
        self.response_with(StringSerializer).await
    }

    /// Wait for the download to finish and deserialize the file as JSON
    pub async fn response_json<T: DeserializeOwned>(&self) -> DownloadResponse<T> {
        self.response_with(JsonSerializer::<T>::default()).await
    }
}
