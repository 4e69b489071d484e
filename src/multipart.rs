//! `multipart/form-data` bodies

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::error::MultipartEncodingFailureReason;
use crate::{Error, Result};

/// Bodies up to this size are encoded in memory, larger ones to a file
pub const DEFAULT_MEMORY_THRESHOLD: u64 = 10_000_000;

const CRLF: &str = "\r\n";
const STREAM_BUFFER_SIZE: usize = 1024;

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_boundary() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let count = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("tether.boundary.{:016x}{:08x}", nanos as u64, count as u32)
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[derive(Debug)]
enum Source {
    Data(Bytes),
    File(PathBuf),
}

#[derive(Debug)]
struct BodyPart {
    headers: Vec<(String, String)>,
    source: Source,
    length: u64,
}

fn failure(reason: MultipartEncodingFailureReason) -> Error {
    Error::MultipartEncodingFailed(reason)
}

/// A multipart form.
///
/// File parts are checked when appended but only read when the form is
/// encoded. The first problem with a part is kept and reported by
/// [`encode`](Self::encode).
///
/// ```rust
/// use tether::MultipartFormData;
///
/// let mut form = MultipartFormData::with_boundary("b");
/// form.append_data("hello", "greeting", None, None);
/// let body = form.encode().unwrap();
/// assert_eq!(
///     &body[..],
///     b"--b\r\nContent-Disposition: form-data; name=\"greeting\"\r\n\r\nhello\r\n--b--\r\n"
/// );
/// ```
#[derive(Debug)]
pub struct MultipartFormData {
    boundary: String,
    parts: Vec<BodyPart>,
    error: Option<Error>,
}

impl Default for MultipartFormData {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartFormData {
    /// Create an empty form with a fresh boundary
    pub fn new() -> Self {
        Self::with_boundary(generate_boundary())
    }

    /// Create an empty form with a fixed boundary
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
            error: None,
        }
    }

    /// Boundary separating the parts
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the `Content-Type` header
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// Size of the encoded body
    pub fn content_length(&self) -> u64 {
        let mut length = 0u64;
        for (index, part) in self.parts.iter().enumerate() {
            length += self.boundary_line(index == 0).len() as u64;
            length += Self::header_block(&part.headers).len() as u64;
            length += part.length;
        }
        if !self.parts.is_empty() {
            length += self.final_boundary().len() as u64;
        }
        length
    }

    /// Append an in-memory part
    pub fn append_data(
        &mut self,
        data: impl Into<Bytes>,
        name: &str,
        file_name: Option<&str>,
        mime_type: Option<&str>,
    ) -> &mut Self {
        let data = data.into();
        let headers = Self::content_headers(name, file_name, mime_type);
        self.parts.push(BodyPart {
            headers,
            length: data.len() as u64,
            source: Source::Data(data),
        });
        self
    }

    /// Append a file, deriving its file name and MIME type from the path
    pub fn append_file(&mut self, path: impl AsRef<Path>, name: &str) -> &mut Self {
        let path = path.as_ref();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return self.record(failure(MultipartEncodingFailureReason::BodyPartFilenameInvalid {
                path: path.to_path_buf(),
            }));
        };
        let file_name = file_name.to_string();
        self.append_file_with(path, name, &file_name, mime_type_for(path))
    }

    /// Append a file with an explicit file name and MIME type
    pub fn append_file_with(
        &mut self,
        path: impl AsRef<Path>,
        name: &str,
        file_name: &str,
        mime_type: &str,
    ) -> &mut Self {
        let path = path.as_ref();
        match Self::file_length(path) {
            Ok(length) => {
                self.parts.push(BodyPart {
                    headers: Self::content_headers(name, Some(file_name), Some(mime_type)),
                    source: Source::File(path.to_path_buf()),
                    length,
                });
                self
            }
            Err(error) => self.record(error),
        }
    }

    fn record(&mut self, error: Error) -> &mut Self {
        self.error.get_or_insert(error);
        self
    }

    fn file_length(path: &Path) -> Result<u64> {
        if path.as_os_str().is_empty() {
            return Err(failure(MultipartEncodingFailureReason::BodyPartUrlInvalid {
                path: path.to_path_buf(),
            }));
        }
        let metadata = std::fs::metadata(path).map_err(|error| {
            failure(MultipartEncodingFailureReason::BodyPartFileNotReachable {
                path: path.to_path_buf(),
                error: Arc::new(error),
            })
        })?;
        if metadata.is_dir() {
            return Err(failure(MultipartEncodingFailureReason::BodyPartFileIsDirectory {
                path: path.to_path_buf(),
            }));
        }
        if !metadata.is_file() {
            return Err(failure(MultipartEncodingFailureReason::BodyPartFileSizeNotAvailable {
                path: path.to_path_buf(),
            }));
        }
        Ok(metadata.len())
    }

    fn content_headers(name: &str, file_name: Option<&str>, mime_type: Option<&str>) -> Vec<(String, String)> {
        let mut disposition = format!("form-data; name=\"{}\"", name);
        if let Some(file_name) = file_name {
            disposition.push_str(&format!("; filename=\"{}\"", file_name));
        }
        let mut headers = vec![("Content-Disposition".to_string(), disposition)];
        if let Some(mime_type) = mime_type {
            headers.push(("Content-Type".to_string(), mime_type.to_string()));
        }
        headers
    }

    fn header_block(headers: &[(String, String)]) -> String {
        let mut block = String::new();
        for (name, value) in headers {
            block.push_str(&format!("{}: {}{}", name, value, CRLF));
        }
        block.push_str(CRLF);
        block
    }

    fn boundary_line(&self, initial: bool) -> String {
        if initial {
            format!("--{}{}", self.boundary, CRLF)
        } else {
            format!("{}--{}{}", CRLF, self.boundary, CRLF)
        }
    }

    fn final_boundary(&self) -> String {
        format!("{}--{}--{}", CRLF, self.boundary, CRLF)
    }

    /// Encode the whole form in memory
    pub fn encode(&self) -> Result<Bytes> {
        let mut out = Vec::with_capacity(self.content_length() as usize);
        self.write_to(&mut out, None)?;
        Ok(Bytes::from(out))
    }

    /// Encode the form into a new file at `path`
    pub fn write_encoded_data(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(failure(MultipartEncodingFailureReason::OutputStreamFileAlreadyExists {
                path: path.to_path_buf(),
            }));
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|error| {
                failure(MultipartEncodingFailureReason::OutputStreamCreationFailed {
                    path: path.to_path_buf(),
                    error: Arc::new(error),
                })
            })?;
        self.write_to(&mut file, Some(path))?;
        file.flush().map_err(|error| write_failed(path, error))
    }

    /// Encode into `out`. `output` names the destination in errors.
    pub(crate) fn write_to(&self, out: &mut impl Write, output: Option<&Path>) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        let output = output.unwrap_or(Path::new(""));
        let mut write = |bytes: &[u8]| out.write_all(bytes).map_err(|e| write_failed(output, e));

        for (index, part) in self.parts.iter().enumerate() {
            write(self.boundary_line(index == 0).as_bytes())?;
            write(Self::header_block(&part.headers).as_bytes())?;
            match &part.source {
                Source::Data(data) => write(&data[..])?,
                Source::File(path) => {
                    let mut file = File::open(path).map_err(|error| {
                        failure(MultipartEncodingFailureReason::BodyPartInputStreamCreationFailed {
                            path: path.clone(),
                            error: Arc::new(error),
                        })
                    })?;
                    let mut buffer = [0u8; STREAM_BUFFER_SIZE];
                    loop {
                        let read = match file.read(&mut buffer) {
                            Ok(0) => break,
                            Ok(read) => read,
                            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                            Err(error) => {
                                return Err(failure(
                                    MultipartEncodingFailureReason::InputStreamReadFailed {
                                        path: path.clone(),
                                        error: Arc::new(error),
                                    },
                                ));
                            }
                        };
                        write(&buffer[..read])?;
                    }
                }
            }
        }
        if !self.parts.is_empty() {
            write(self.final_boundary().as_bytes())?;
        }
        Ok(())
    }
}

fn write_failed(path: &Path, error: io::Error) -> Error {
    failure(MultipartEncodingFailureReason::OutputStreamWriteFailed {
        path: path.to_path_buf(),
        error: Arc::new(error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_parts_between_boundaries() {
        let mut form = MultipartFormData::with_boundary("xyz");
        form.append_data("1", "a", None, None)
            .append_data(&b"{}"[..], "b", Some("b.json"), Some("application/json"));
        let body = form.encode().unwrap();
        let expected = concat!(
            "--xyz\r\n",
            "Content-Disposition: form-data; name=\"a\"\r\n\r\n",
            "1",
            "\r\n--xyz\r\n",
            "Content-Disposition: form-data; name=\"b\"; filename=\"b.json\"\r\n",
            "Content-Type: application/json\r\n\r\n",
            "{}",
            "\r\n--xyz--\r\n",
        );
        assert_eq!(std::str::from_utf8(&body).unwrap(), expected);
        assert_eq!(form.content_length(), body.len() as u64);
    }

    #[test]
    fn file_parts_are_streamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "file contents").unwrap();

        let mut form = MultipartFormData::with_boundary("b");
        form.append_file(&path, "upload");
        let body = form.encode().unwrap();
        let text = std::str::from_utf8(&body).unwrap();
        assert!(text.contains("filename=\"notes.txt\""));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.contains("file contents"));
        assert_eq!(form.content_length(), body.len() as u64);

        let output = dir.path().join("encoded");
        form.write_encoded_data(&output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), body.to_vec());

        let error = form.write_encoded_data(&output).unwrap_err();
        assert!(matches!(
            error,
            Error::MultipartEncodingFailed(
                MultipartEncodingFailureReason::OutputStreamFileAlreadyExists { .. }
            )
        ));
    }

    #[test]
    fn bad_file_parts_fail_on_encode() {
        let dir = tempfile::tempdir().unwrap();

        let mut form = MultipartFormData::new();
        form.append_file(dir.path(), "dir");
        assert!(matches!(
            form.encode().unwrap_err(),
            Error::MultipartEncodingFailed(MultipartEncodingFailureReason::BodyPartFileIsDirectory { .. })
        ));

        let mut form = MultipartFormData::new();
        form.append_file(dir.path().join("missing.bin"), "missing");
        assert!(matches!(
            form.encode().unwrap_err(),
            Error::MultipartEncodingFailed(MultipartEncodingFailureReason::BodyPartFileNotReachable { .. })
        ));
    }

    #[test]
    fn boundaries_are_unique() {
        assert_ne!(MultipartFormData::new().boundary(), MultipartFormData::new().boundary());
        assert!(MultipartFormData::new().content_type().starts_with("multipart/form-data; boundary="));
    }
}
