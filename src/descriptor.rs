//! Request descriptors and builders

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, header};
use url::Url;

use crate::parameters::{JsonEncoding, ParameterEncoding, Parameters, UrlEncoding};
use crate::{Error, Result};

/// A fully described HTTP request.
///
/// This is what adapters mutate and what backends send. It is cheap to
/// clone since the body is reference counted.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
    /// Per-request timeout
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// Create a request without headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Parse `url` and create a request
    pub fn parse(method: Method, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|_| Error::InvalidUrl {
            url: url.to_string(),
        })?;
        Ok(Self::new(method, url))
    }

    /// Set a header, replacing any previous value
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let (name, value) = parse_header(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Value of a header as text
    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Anything that can be turned into a [`RequestDescriptor`].
///
/// Conversion failures are not raised at the call site; the session records
/// them on the request wrapper it returns.
pub trait IntoRequest {
    /// Build the descriptor
    fn into_request(self) -> Result<RequestDescriptor>;
}

impl IntoRequest for RequestDescriptor {
    fn into_request(self) -> Result<RequestDescriptor> {
        Ok(self)
    }
}

impl IntoRequest for Url {
    fn into_request(self) -> Result<RequestDescriptor> {
        Ok(RequestDescriptor::new(Method::GET, self))
    }
}

impl IntoRequest for &str {
    fn into_request(self) -> Result<RequestDescriptor> {
        RequestDescriptor::parse(Method::GET, self)
    }
}

impl IntoRequest for String {
    fn into_request(self) -> Result<RequestDescriptor> {
        self.as_str().into_request()
    }
}

impl IntoRequest for Result<RequestDescriptor> {
    fn into_request(self) -> Result<RequestDescriptor> {
        self
    }
}

enum Payload {
    Parameters {
        parameters: Parameters,
        encoding: Arc<dyn ParameterEncoding>,
    },
    Json(Result<serde_json::Value>),
    Bytes {
        content: Bytes,
        content_type: String,
    },
}

/// Request builder.
///
/// Nothing is validated until the builder is handed to a session; invalid
/// URLs, headers or parameters then surface as the request's error.
///
/// ```rust
/// use tether::{RequestBuilder, IntoRequest};
///
/// let request = RequestBuilder::get("https://api.example.com/items")
///     .header("Accept", "application/json")
///     .query([("page", "2")])
///     .into_request()
///     .unwrap();
/// assert_eq!(request.url.as_str(), "https://api.example.com/items?page=2");
/// ```
pub struct RequestBuilder {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    payload: Option<Payload>,
    timeout: Option<Duration>,
}

impl RequestBuilder {
    /// Create a builder for `method` and `url`
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            payload: None,
            timeout: None,
        }
    }

    /// Create a GET request
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Create a POST request
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Create a PUT request
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    /// Create a DELETE request
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    /// Create a PATCH request
    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    /// Create a HEAD request
    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::HEAD, url)
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Encode `parameters` with `encoding`
    pub fn parameters(
        mut self,
        parameters: Parameters,
        encoding: impl ParameterEncoding + 'static,
    ) -> Self {
        self.payload = Some(Payload::Parameters {
            parameters,
            encoding: Arc::new(encoding),
        });
        self
    }

    /// Add URL query parameters
    pub fn query<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters(to_parameters(pairs), UrlEncoding::query_string())
    }

    /// Set a form encoded body
    pub fn form<K, V>(self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.parameters(to_parameters(pairs), UrlEncoding::http_body())
    }

    /// Set a JSON body
    pub fn json(mut self, value: &impl serde::Serialize) -> Self {
        let value = serde_json::to_value(value).map_err(JsonEncoding::failure);
        self.payload = Some(Payload::Json(value));
        self
    }

    /// Set a raw body
    pub fn body(mut self, content: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.payload = Some(Payload::Bytes {
            content: content.into(),
            content_type: content_type.into(),
        });
        self
    }

    /// Set the per-request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl IntoRequest for RequestBuilder {
    fn into_request(self) -> Result<RequestDescriptor> {
        let mut request = RequestDescriptor::parse(self.method, &self.url)?;
        request.timeout = self.timeout;

        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            request.headers.append(name, value);
        }

        match self.payload {
            None => Ok(request),
            Some(Payload::Parameters {
                parameters,
                encoding,
            }) => encoding.encode(request, Some(&parameters)),
            Some(Payload::Json(value)) => JsonEncoding::default().encode_value(request, &value?),
            Some(Payload::Bytes {
                content,
                content_type,
            }) => {
                if !request.headers.contains_key(header::CONTENT_TYPE) {
                    request.set_header(header::CONTENT_TYPE.as_str(), &content_type)?;
                }
                request.body = Some(content);
                Ok(request)
            }
        }
    }
}

fn to_parameters<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Parameters
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), serde_json::Value::String(v.into())))
        .collect()
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let invalid = || Error::InvalidHeader {
        name: name.to_string(),
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
    let header_value = HeaderValue::from_str(value).map_err(|_| invalid())?;
    Ok((header_name, header_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_url_is_reported() {
        let error = RequestBuilder::get("not a url").into_request().unwrap_err();
        assert!(error.is_invalid_url());
    }

    #[test]
    fn invalid_header_is_reported() {
        let error = RequestBuilder::get("https://example.com")
            .header("bad header", "x")
            .into_request()
            .unwrap_err();
        assert!(matches!(error, Error::InvalidHeader { name } if name == "bad header"));
    }

    #[test]
    fn raw_body_sets_content_type() {
        let request = RequestBuilder::post("https://example.com/upload")
            .body(&b"hello"[..], "text/plain")
            .into_request()
            .unwrap();
        assert_eq!(request.header(header::CONTENT_TYPE), Some("text/plain"));
        assert_eq!(request.body.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn json_body() {
        let request = RequestBuilder::post("https://example.com/items")
            .json(&serde_json::json!({ "ok": true }))
            .into_request()
            .unwrap();
        assert_eq!(request.header(header::CONTENT_TYPE), Some("application/json"));
        assert_eq!(request.body.as_deref(), Some(&br#"{"ok":true}"#[..]));
    }

    #[test]
    fn form_body() {
        let request = RequestBuilder::post("https://example.com/login")
            .form([("user", "john doe"), ("remember", "true")])
            .into_request()
            .unwrap();
        assert_eq!(
            request.body.as_deref(),
            Some(&b"remember=true&user=john%20doe"[..])
        );
    }
}
