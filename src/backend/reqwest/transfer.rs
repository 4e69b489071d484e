//! Data, upload and download tasks

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use http::{Method, StatusCode, header};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::watch;
use url::Url;

use super::{Cancelled, Control, Shared, cancellation, checkpoint, map_error};
use crate::auth::Persistence;
use crate::backend::types::{
    AuthChallenge, AuthScheme, BodyStream, ChallengeDisposition, ResponseHead, TaskId, TaskKind,
    TaskMetrics, TransportTask, UploadBody,
};
use crate::descriptor::{RequestDescriptor, parse_header};
use crate::error::TaskCreationFailureReason;
use crate::{Error, Result};

const MAX_REDIRECTS: u32 = 10;
const MAX_CHALLENGES: u32 = 3;
const CHUNK_SIZE: usize = 64 * 1024;
const TOO_MANY_REDIRECTS: i64 = -1007;

/// Progress of a download, kept so a cancel can produce resume data
#[derive(Debug, Clone)]
pub(super) struct DownloadCheckpoint {
    url: Url,
    headers: Vec<(String, String)>,
    path: PathBuf,
    offset: u64,
    etag: Option<String>,
}

/// Serialized form of a [`DownloadCheckpoint`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct ResumeData {
    url: String,
    #[serde(default)]
    headers: Vec<(String, String)>,
    path: PathBuf,
    offset: u64,
    etag: Option<String>,
}

impl From<DownloadCheckpoint> for ResumeData {
    fn from(checkpoint: DownloadCheckpoint) -> Self {
        Self {
            url: checkpoint.url.into(),
            headers: checkpoint.headers,
            path: checkpoint.path,
            offset: checkpoint.offset,
            etag: checkpoint.etag,
        }
    }
}

fn invalid_resume_data() -> Error {
    Error::TaskCreationFailed(TaskCreationFailureReason::InvalidResumeData)
}

impl ResumeData {
    pub(super) fn decode(data: &[u8]) -> Result<Self> {
        let resume: ResumeData = serde_json::from_slice(data).map_err(|_| invalid_resume_data())?;
        Url::parse(&resume.url).map_err(|_| invalid_resume_data())?;
        Ok(resume)
    }

    pub(super) fn encode(&self) -> Option<Bytes> {
        serde_json::to_vec(self).ok().map(Bytes::from)
    }

    /// Range request continuing from the offset
    fn request(&self) -> Result<RequestDescriptor> {
        let url = Url::parse(&self.url).map_err(|_| invalid_resume_data())?;
        let mut request = RequestDescriptor::new(Method::GET, url);
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            request.headers.append(name, value);
        }
        request.set_header(header::RANGE.as_str(), &format!("bytes={}-", self.offset))?;
        if let Some(etag) = &self.etag {
            request.set_header(header::IF_RANGE.as_str(), etag)?;
        }
        Ok(request)
    }
}

/// Why reading a body stopped early
enum Stop {
    Cancelled(Cancelled),
    Failed(Error),
}

impl From<Stop> for Error {
    fn from(stop: Stop) -> Self {
        match stop {
            Stop::Cancelled(_) => Error::Cancelled,
            Stop::Failed(error) => error,
        }
    }
}

async fn next_chunk<S>(
    body: &mut S,
    control: &mut watch::Receiver<Control>,
) -> std::result::Result<Option<Bytes>, Stop>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    if let Some(cancelled) = checkpoint(control).await {
        return Err(Stop::Cancelled(cancelled));
    }
    tokio::select! {
        cancelled = cancellation(control) => Err(Stop::Cancelled(cancelled)),
        chunk = body.next() => match chunk {
            None => Ok(None),
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(error)) => Err(Stop::Failed(map_error(error))),
        },
    }
}

/// Request body source, reopened for every attempt
enum Payload {
    Empty,
    Data(Bytes),
    File(PathBuf),
    Stream(Option<BodyStream>),
}

impl Payload {
    fn from_body(body: Option<Bytes>) -> Self {
        match body {
            Some(data) => Payload::Data(data),
            None => Payload::Empty,
        }
    }

    fn from_upload(body: UploadBody) -> Self {
        match body {
            UploadBody::Data(data) => Payload::Data(data),
            UploadBody::File(path) => Payload::File(path),
            UploadBody::Stream(stream) => Payload::Stream(Some(stream)),
        }
    }

    /// A streamed body that was already sent cannot be sent again
    fn is_exhausted(&self) -> bool {
        matches!(self, Payload::Stream(None))
    }

    async fn open(&mut self) -> Result<Option<(BodyStream, Option<u64>)>> {
        match self {
            Payload::Empty => Ok(None),
            Payload::Data(data) => {
                let data = data.clone();
                let length = data.len() as u64;
                let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
                    .step_by(CHUNK_SIZE)
                    .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
                    .collect();
                Ok(Some((Box::pin(stream::iter(chunks)), Some(length))))
            }
            Payload::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let length = file.metadata().await?.len();
                Ok(Some((file_stream(file), Some(length))))
            }
            Payload::Stream(stream) => Ok(stream.take().map(|stream| (stream, None))),
        }
    }
}

fn file_stream(file: tokio::fs::File) -> BodyStream {
    Box::pin(stream::try_unfold(file, |mut file| async move {
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.truncate(read);
        Ok(Some((Bytes::from(buffer), file)))
    }))
}

/// Report upload progress as the body is pulled
fn progress_body(
    shared: &Arc<Shared>,
    task: TaskId,
    body: BodyStream,
    total: Option<u64>,
    sent: Arc<AtomicU64>,
) -> reqwest::Body {
    let shared = shared.clone();
    let body = body.inspect_ok(move |chunk| {
        let length = chunk.len() as u64;
        let total_sent = sent.fetch_add(length, Ordering::Relaxed) + length;
        if let Some(delegate) = shared.delegate() {
            delegate.did_send_body_data(task, length, total_sent, total);
        }
    });
    reqwest::Body::wrap_stream(body)
}

fn redirect_request(current: &RequestDescriptor, status: StatusCode, location: Url) -> RequestDescriptor {
    let mut next = current.clone();
    let to_get = status == StatusCode::SEE_OTHER
        || ((status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND)
            && current.method == Method::POST);
    if to_get {
        if next.method != Method::HEAD {
            next.method = Method::GET;
        }
        next.body = None;
        next.headers.remove(header::CONTENT_TYPE);
        next.headers.remove(header::CONTENT_LENGTH);
    }
    if location.host_str() != current.url.host_str() || location.port() != current.url.port() {
        next.headers.remove(header::AUTHORIZATION);
    }
    next.url = location;
    next
}

fn protection_space(challenge: &AuthChallenge) -> String {
    format!(
        "{}:{}:{}",
        challenge.host,
        challenge.port.unwrap_or_default(),
        challenge.realm.as_deref().unwrap_or_default()
    )
}

/// How the body of the final response is consumed
enum Sink {
    Memory,
    File {
        resume: Option<ResumeData>,
        slot: Option<Arc<Mutex<Option<DownloadCheckpoint>>>>,
    },
}

pub(super) async fn run(
    shared: Arc<Shared>,
    task: TaskId,
    transport: TransportTask,
    download: Option<Arc<Mutex<Option<DownloadCheckpoint>>>>,
    mut control: watch::Receiver<Control>,
) {
    let mut metrics = TaskMetrics {
        fetch_start: Some(Instant::now()),
        ..TaskMetrics::default()
    };
    let result = execute(&shared, task, transport, download, &mut control, &mut metrics).await;
    shared.complete(task, Some(metrics), result.err());
}

async fn execute(
    shared: &Arc<Shared>,
    task: TaskId,
    transport: TransportTask,
    download: Option<Arc<Mutex<Option<DownloadCheckpoint>>>>,
    control: &mut watch::Receiver<Control>,
    metrics: &mut TaskMetrics,
) -> Result<()> {
    let (mut request, mut payload, sink, upload) = match transport {
        TransportTask::Data { request } => {
            let payload = Payload::from_body(request.body.clone());
            (request, payload, Sink::Memory, false)
        }
        TransportTask::Upload { request, body } => {
            (request, Payload::from_upload(body), Sink::Memory, true)
        }
        TransportTask::Download { request } => {
            let payload = Payload::from_body(request.body.clone());
            let sink = Sink::File {
                resume: None,
                slot: download,
            };
            (request, payload, sink, false)
        }
        TransportTask::DownloadResuming { resume_data } => {
            let resume = ResumeData::decode(&resume_data)?;
            let request = resume.request()?;
            let sink = Sink::File {
                resume: Some(resume),
                slot: download,
            };
            (request, Payload::Empty, sink, false)
        }
        TransportTask::Stream { .. } => {
            return Err(Error::TaskCreationFailed(TaskCreationFailureReason::Unsupported(
                TaskKind::Stream,
            )));
        }
    };

    let sent = Arc::new(AtomicU64::new(0));
    let mut challenges = 0u32;

    let response = loop {
        let mut builder = shared
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some((body, length)) = payload.open().await? {
            if let Some(length) = length {
                if !request.headers.contains_key(header::CONTENT_LENGTH) {
                    builder = builder.header(header::CONTENT_LENGTH, length);
                }
            }
            builder = builder.body(progress_body(shared, task, body, length, sent.clone()));
        }

        tracing::trace!(%task, method = %request.method, url = %request.url, "sending request");
        let response = tokio::select! {
            _ = cancellation(control) => return Err(Error::Cancelled),
            response = builder.send() => response.map_err(map_error)?,
        };
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(header::LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| request.url.join(value).ok());
            if let Some(location) = location {
                if metrics.redirect_count >= MAX_REDIRECTS {
                    return Err(Error::Network {
                        code: TOO_MANY_REDIRECTS,
                        message: format!("too many redirects, last to {}", location),
                    });
                }

                let next = redirect_request(&request, status, location);
                if upload && next.method == request.method && payload.is_exhausted() {
                    break response;
                }

                let head =
                    ResponseHead::new(status, response.headers().clone(), response.url().clone());
                let decision = match shared.delegate() {
                    Some(delegate) => delegate.will_perform_redirection(task, &head, next),
                    None => Some(next),
                };
                if let Some(next) = decision {
                    payload = match upload {
                        true if next.method == request.method => payload,
                        true => Payload::Empty,
                        false => Payload::from_body(next.body.clone()),
                    };
                    tracing::debug!(%task, to = %next.url, "following redirect");
                    metrics.redirect_count += 1;
                    request = next;
                    continue;
                }
            }
        }

        if status == StatusCode::UNAUTHORIZED && !payload.is_exhausted() {
            let value = response
                .headers()
                .get(header::WWW_AUTHENTICATE)
                .and_then(|value| value.to_str().ok());
            if let Some(value) = value {
                let challenge = AuthChallenge::from_header(&request.url, value, challenges);
                let space = protection_space(&challenge);
                let disposition = match shared.delegate() {
                    Some(delegate) => delegate.did_receive_challenge(task, &challenge),
                    None => ChallengeDisposition::PerformDefaultHandling,
                };
                let credential = match disposition {
                    ChallengeDisposition::UseCredential(credential) => Some(credential),
                    ChallengeDisposition::PerformDefaultHandling if challenges == 0 => {
                        shared.stored_credential(&space)
                    }
                    ChallengeDisposition::PerformDefaultHandling
                    | ChallengeDisposition::RejectProtectionSpace => None,
                    ChallengeDisposition::CancelChallenge => return Err(Error::Cancelled),
                };

                let usable = challenge.scheme == AuthScheme::Basic && challenges < MAX_CHALLENGES;
                if let (Some(credential), true) = (credential, usable) {
                    if credential.persistence() == Persistence::ForSession {
                        shared.store_credential(space, credential.clone());
                    }
                    request
                        .headers
                        .insert(header::AUTHORIZATION, credential.authorization_header());
                    challenges += 1;
                    tracing::debug!(%task, attempt = challenges, "answering authentication challenge");
                    continue;
                }
            }
        }

        break response;
    };

    metrics.response_start = Some(Instant::now());
    metrics.bytes_sent = sent.load(Ordering::Relaxed);
    let head = ResponseHead::new(
        response.status(),
        response.headers().clone(),
        response.url().clone(),
    );
    if let Some(delegate) = shared.delegate() {
        delegate.did_receive_response(task, head.clone());
    }

    let mut body = std::pin::pin!(response.bytes_stream());
    let result = match sink {
        Sink::Memory => buffer(shared, task, &mut body, control, metrics).await,
        Sink::File { resume, slot } => {
            write_file(shared, task, &request, &head, resume, slot, &mut body, control, metrics).await
        }
    };
    metrics.response_end = Some(Instant::now());
    result
}

async fn buffer<S>(
    shared: &Arc<Shared>,
    task: TaskId,
    body: &mut S,
    control: &mut watch::Receiver<Control>,
    metrics: &mut TaskMetrics,
) -> Result<()>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    while let Some(chunk) = next_chunk(body, control).await? {
        metrics.bytes_received += chunk.len() as u64;
        if let Some(delegate) = shared.delegate() {
            delegate.did_receive_data(task, chunk);
        }
    }
    Ok(())
}

fn temporary_file() -> Result<PathBuf> {
    let file = tempfile::Builder::new()
        .prefix("tether-download-")
        .tempfile()?;
    file.into_temp_path().keep().map_err(|e| Error::from(e.error))
}

fn resumable_headers(request: &RequestDescriptor) -> Vec<(String, String)> {
    request
        .headers
        .iter()
        .filter(|(name, _)| **name != header::RANGE && **name != header::IF_RANGE)
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn write_file<S>(
    shared: &Arc<Shared>,
    task: TaskId,
    request: &RequestDescriptor,
    head: &ResponseHead,
    resume: Option<ResumeData>,
    slot: Option<Arc<Mutex<Option<DownloadCheckpoint>>>>,
    body: &mut S,
    control: &mut watch::Receiver<Control>,
    metrics: &mut TaskMetrics,
) -> Result<()>
where
    S: Stream<Item = reqwest::Result<Bytes>> + Unpin,
{
    let resuming = resume.is_some();
    let (path, offset, previous_etag) = match resume {
        Some(resume) if head.status == StatusCode::PARTIAL_CONTENT => {
            (resume.path, resume.offset, resume.etag)
        }
        // The file is already complete
        Some(resume) if head.status == StatusCode::RANGE_NOT_SATISFIABLE => {
            if let Some(delegate) = shared.delegate() {
                delegate.did_finish_downloading(task, resume.path);
            }
            return Ok(());
        }
        Some(resume) => (resume.path, 0, None),
        None => (temporary_file()?, 0, None),
    };

    let etag = head
        .headers
        .get(header::ETAG)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or(previous_etag);
    let mut record = DownloadCheckpoint {
        url: request.url.clone(),
        headers: resumable_headers(request),
        path: path.clone(),
        offset,
        etag,
    };
    let save = |record: &DownloadCheckpoint| {
        if let Some(slot) = &slot {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        }
    };
    save(&record);

    let outcome: std::result::Result<(), Stop> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(!resuming)
            .open(&path)
            .await
            .map_err(|e| Stop::Failed(e.into()))?;
        file.set_len(offset).await.map_err(|e| Stop::Failed(e.into()))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| Stop::Failed(e.into()))?;

        let expected = head.expected_content_length.map(|length| length + offset);
        let mut written = offset;
        while let Some(chunk) = next_chunk(body, control).await? {
            file.write_all(&chunk).await.map_err(|e| Stop::Failed(e.into()))?;
            written += chunk.len() as u64;
            metrics.bytes_received += chunk.len() as u64;
            record.offset = written;
            save(&record);
            if let Some(delegate) = shared.delegate() {
                delegate.did_write_data(task, chunk.len() as u64, written, expected);
            }
        }
        file.flush().await.map_err(|e| Stop::Failed(e.into()))?;
        Ok::<(), Stop>(())
    }
    .await;

    match outcome {
        Ok(()) => {
            if let Some(delegate) = shared.delegate() {
                delegate.did_finish_downloading(task, path);
            }
            Ok(())
        }
        Err(Stop::Cancelled(Cancelled { keep_partial: true })) => {
            tracing::debug!(%task, ?path, "download cancelled, keeping partial file");
            Err(Error::Cancelled)
        }
        Err(stop) => {
            let _ = tokio::fs::remove_file(&path).await;
            Err(stop.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(method: Method, url: &str) -> RequestDescriptor {
        let mut request = RequestDescriptor::parse(method, url).unwrap();
        request.set_header("content-type", "application/json").unwrap();
        request.set_header("authorization", "Basic abc").unwrap();
        request.body = Some(Bytes::from_static(b"{}"));
        request
    }

    #[tokio::test]
    async fn next_chunk_yields_body_until_end() {
        let (_tx, mut control) = watch::channel(Control::Run);
        let mut body = stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from_static(b"abc"))]);
        let chunk = next_chunk(&mut body, &mut control).await.ok().flatten();
        assert_eq!(chunk.as_deref(), Some(&b"abc"[..]));
        assert!(matches!(next_chunk(&mut body, &mut control).await, Ok(None)));
    }

    #[tokio::test]
    async fn next_chunk_stops_on_cancel() {
        let (_tx, mut control) = watch::channel(Control::Cancel { keep_partial: true });
        let mut body = stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from_static(b"abc"))]);
        let stop = next_chunk(&mut body, &mut control).await;
        assert!(matches!(stop, Err(Stop::Cancelled(Cancelled { keep_partial: true }))));
        assert!(matches!(Error::from(Stop::Cancelled(Cancelled::DISCARD)), Error::Cancelled));
    }

    #[test]
    fn see_other_switches_to_get() {
        let current = descriptor(Method::POST, "https://a.example.com/form");
        let next = redirect_request(
            &current,
            StatusCode::SEE_OTHER,
            Url::parse("https://a.example.com/done").unwrap(),
        );
        assert_eq!(next.method, Method::GET);
        assert!(next.body.is_none());
        assert!(next.header(header::CONTENT_TYPE).is_none());
        assert_eq!(next.header(header::AUTHORIZATION), Some("Basic abc"));
    }

    #[test]
    fn temporary_redirect_keeps_method_and_drops_auth_across_hosts() {
        let current = descriptor(Method::PUT, "https://a.example.com/item");
        let next = redirect_request(
            &current,
            StatusCode::TEMPORARY_REDIRECT,
            Url::parse("https://b.example.com/item").unwrap(),
        );
        assert_eq!(next.method, Method::PUT);
        assert!(next.body.is_some());
        assert!(next.header(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn resume_data_requests_remaining_range() {
        let checkpoint = DownloadCheckpoint {
            url: Url::parse("https://example.com/file.bin").unwrap(),
            headers: vec![("x-token".into(), "t".into())],
            path: PathBuf::from("/tmp/partial"),
            offset: 1024,
            etag: Some("\"v1\"".into()),
        };
        let encoded = ResumeData::from(checkpoint).encode().unwrap();
        let request = ResumeData::decode(&encoded).unwrap().request().unwrap();
        assert_eq!(request.header(header::RANGE), Some("bytes=1024-"));
        assert_eq!(request.header(header::IF_RANGE), Some("\"v1\""));
        assert_eq!(request.header("x-token"), Some("t"));
    }

    #[tokio::test]
    async fn data_payload_is_chunked_and_replayable() {
        let data = Bytes::from(vec![7u8; CHUNK_SIZE + 10]);
        let mut payload = Payload::Data(data.clone());
        for _ in 0..2 {
            let (body, length) = payload.open().await.unwrap().unwrap();
            assert_eq!(length, Some(data.len() as u64));
            let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
            assert_eq!(chunks.len(), 2);
            assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), data.len());
        }
        assert!(!payload.is_exhausted());
    }

    #[tokio::test]
    async fn stream_payload_is_single_use() {
        let body: BodyStream = Box::pin(stream::iter(vec![Ok(Bytes::from_static(b"a"))]));
        let mut payload = Payload::Stream(Some(body));
        assert!(payload.open().await.unwrap().is_some());
        assert!(payload.is_exhausted());
        assert!(payload.open().await.unwrap().is_none());
    }
}
