//! HTTP request lifecycle, validation and retry coordination
//!
//! A [`Session`] turns requests into backend tasks, tracks each task against
//! the request wrapper that owns it and runs the wrapper's validations when
//! the task completes. Failed requests are handed to a [`RequestRetrier`],
//! which decides whether the request is sent again with a fresh task.
//!
//! ```rust,no_run
//! # async fn run() -> tether::Result<()> {
//! use std::time::Duration;
//! use tether::{Backoff, RequestBuilder, RetryPolicy, Session};
//!
//! let session = Session::builder()
//!     .timeout(Duration::from_secs(30))
//!     .retrier(RetryPolicy::default().backoff(Backoff::default()))
//!     .build()?;
//!
//! let response = session
//!     .request(RequestBuilder::get("https://httpbin.org/json"))
//!     .validate()
//!     .response_json::<serde_json::Value>()
//!     .await;
//!
//! match response.result {
//!     Ok(json) => println!("{json}"),
//!     Err(error) => eprintln!("failed after {} retries: {error}", response.retry_count),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Transport is pluggable through [`backend::Backend`]; the default
//! `backend-reqwest` feature provides one built on reqwest.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

pub use adapter::RequestAdapter;
pub use auth::{Credential, Persistence};
pub use descriptor::{IntoRequest, RequestBuilder, RequestDescriptor};
pub use error::{
    Error, MultipartEncodingFailureReason, ParameterEncodingFailureReason, Result,
    ResponseSerializationFailureReason, ResponseValidationFailureReason,
    TaskCreationFailureReason,
};
pub use events::{LifecycleEvent, LifecycleEventKind};
pub use multipart::MultipartFormData;
pub use request::{
    DataRequest, Destination, DownloadOptions, DownloadRequest, Progress, Request, StreamRequest,
    TaskState, UploadRequest,
};
pub use response::{
    DataResponse, DataSerializer, DownloadResponse, JsonSerializer, ResponseSerializer,
    StringSerializer, Timeline,
};
pub use retry::{Backoff, RequestRetrier, RetryCompletion, RetryDecision, RetryPolicy};
pub use session::{Session, SessionBuilder, SessionConfig};

pub mod backend;
pub mod mime;
pub mod parameters;
pub mod validation;

mod adapter;
mod auth;
mod delegate;
mod descriptor;
mod error;
mod events;
mod multipart;
mod registry;
mod request;
mod response;
mod retry;
mod session;
mod task;
