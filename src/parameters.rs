//! Parameter encoding

use std::sync::Arc;

use bytes::Bytes;
use http::{Method, header};
use serde_json::Value;

use crate::descriptor::RequestDescriptor;
use crate::error::ParameterEncodingFailureReason;
use crate::{Error, Result};

/// Key/value parameters, kept sorted by key
pub type Parameters = serde_json::Map<String, Value>;

/// Applies parameters to a request
pub trait ParameterEncoding: Send + Sync {
    /// Return `request` with `parameters` applied to its URL or body
    fn encode(
        &self,
        request: RequestDescriptor,
        parameters: Option<&Parameters>,
    ) -> Result<RequestDescriptor>;
}

/// Where URL encoded parameters go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
    /// Query string for `GET`, `HEAD` and `DELETE`, body otherwise
    #[default]
    MethodDependent,
    /// Always the query string
    QueryString,
    /// Always the body
    HttpBody,
}

/// How arrays are keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayEncoding {
    /// `key[]=a&key[]=b`
    #[default]
    Brackets,
    /// `key=a&key=b`
    NoBrackets,
}

/// How booleans are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoolEncoding {
    /// `1` and `0`
    #[default]
    Numeric,
    /// `true` and `false`
    Literal,
}

/// `application/x-www-form-urlencoded` encoding.
///
/// Nested objects are flattened as `key[sub]`, arrays according to
/// [`ArrayEncoding`]. Keys are emitted in sorted order.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlEncoding {
    destination: Destination,
    array: ArrayEncoding,
    bool: BoolEncoding,
}

impl UrlEncoding {
    /// Encoding that picks the destination from the method
    pub fn method_dependent() -> Self {
        Self::default()
    }

    /// Encoding that always writes the query string
    pub fn query_string() -> Self {
        Self {
            destination: Destination::QueryString,
            ..Self::default()
        }
    }

    /// Encoding that always writes the body
    pub fn http_body() -> Self {
        Self {
            destination: Destination::HttpBody,
            ..Self::default()
        }
    }

    /// Change array keying
    pub fn array_encoding(mut self, array: ArrayEncoding) -> Self {
        self.array = array;
        self
    }

    /// Change boolean rendering
    pub fn bool_encoding(mut self, bool: BoolEncoding) -> Self {
        self.bool = bool;
        self
    }

    /// Percent-encoded `key=value` pairs joined with `&`
    pub fn query(&self, parameters: &Parameters) -> String {
        let mut components = Vec::new();
        for (key, value) in parameters {
            self.components(key, value, &mut components);
        }
        components
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn components(&self, key: &str, value: &Value, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (nested, value) in map {
                    self.components(&format!("{}[{}]", key, nested), value, out);
                }
            }
            Value::Array(items) => {
                let key = match self.array {
                    ArrayEncoding::Brackets => format!("{}[]", key),
                    ArrayEncoding::NoBrackets => key.to_string(),
                };
                for value in items {
                    self.components(&key, value, out);
                }
            }
            Value::Bool(b) => {
                let rendered = match (self.bool, b) {
                    (BoolEncoding::Numeric, true) => "1",
                    (BoolEncoding::Numeric, false) => "0",
                    (BoolEncoding::Literal, true) => "true",
                    (BoolEncoding::Literal, false) => "false",
                };
                out.push((key.to_string(), rendered.to_string()));
            }
            Value::String(s) => out.push((key.to_string(), s.clone())),
            Value::Number(n) => out.push((key.to_string(), n.to_string())),
            Value::Null => out.push((key.to_string(), String::new())),
        }
    }

    fn encodes_in_url(&self, method: &Method) -> bool {
        match self.destination {
            Destination::MethodDependent => {
                matches!(*method, Method::GET | Method::HEAD | Method::DELETE)
            }
            Destination::QueryString => true,
            Destination::HttpBody => false,
        }
    }
}

impl ParameterEncoding for UrlEncoding {
    fn encode(
        &self,
        mut request: RequestDescriptor,
        parameters: Option<&Parameters>,
    ) -> Result<RequestDescriptor> {
        let Some(parameters) = parameters else {
            return Ok(request);
        };

        if self.encodes_in_url(&request.method) {
            if request.url.cannot_be_a_base() {
                return Err(Error::ParameterEncodingFailed(
                    ParameterEncodingFailureReason::MissingUrl,
                ));
            }
            if parameters.is_empty() {
                return Ok(request);
            }
            let encoded = self.query(parameters);
            let query = match request.url.query() {
                Some(existing) if !existing.is_empty() => format!("{}&{}", existing, encoded),
                _ => encoded,
            };
            request.url.set_query(Some(&query));
        } else {
            if !request.headers.contains_key(header::CONTENT_TYPE) {
                request.headers.insert(
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static(
                        "application/x-www-form-urlencoded; charset=utf-8",
                    ),
                );
            }
            request.body = Some(Bytes::from(self.query(parameters)));
        }

        Ok(request)
    }
}

/// `application/json` body encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoding {
    pretty: bool,
}

impl JsonEncoding {
    /// Pretty printed JSON
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub(crate) fn failure(error: serde_json::Error) -> Error {
        Error::ParameterEncodingFailed(ParameterEncodingFailureReason::JsonEncodingFailed(
            Arc::new(error),
        ))
    }

    /// Encode any JSON value as the request body
    pub fn encode_value(
        &self,
        mut request: RequestDescriptor,
        value: &Value,
    ) -> Result<RequestDescriptor> {
        let body = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        }
        .map_err(Self::failure)?;

        if !request.headers.contains_key(header::CONTENT_TYPE) {
            request.headers.insert(
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/json"),
            );
        }
        request.body = Some(Bytes::from(body));
        Ok(request)
    }
}

impl ParameterEncoding for JsonEncoding {
    fn encode(
        &self,
        request: RequestDescriptor,
        parameters: Option<&Parameters>,
    ) -> Result<RequestDescriptor> {
        match parameters {
            Some(parameters) => self.encode_value(request, &Value::Object(parameters.clone())),
            None => Ok(request),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn get_parameters_go_to_query() {
        let request = RequestDescriptor::parse(Method::GET, "https://example.com/s?x=1").unwrap();
        let encoded = UrlEncoding::default()
            .encode(request, Some(&params(json!({ "q": "a b", "page": 2 }))))
            .unwrap();
        assert_eq!(encoded.url.query(), Some("x=1&page=2&q=a%20b"));
        assert!(encoded.body.is_none());
    }

    #[test]
    fn post_parameters_go_to_body() {
        let request = RequestDescriptor::parse(Method::POST, "https://example.com/s").unwrap();
        let encoded = UrlEncoding::default()
            .encode(request, Some(&params(json!({ "flag": true }))))
            .unwrap();
        assert_eq!(encoded.body.as_deref(), Some(&b"flag=1"[..]));
        assert_eq!(
            encoded.header(header::CONTENT_TYPE),
            Some("application/x-www-form-urlencoded; charset=utf-8")
        );
    }

    #[test]
    fn nested_values_are_flattened() {
        let query = UrlEncoding::default().query(&params(json!({
            "filter": { "tag": ["a", "b"] },
            "on": false,
        })));
        assert_eq!(
            query,
            "filter%5Btag%5D%5B%5D=a&filter%5Btag%5D%5B%5D=b&on=0"
        );

        let query = UrlEncoding::default()
            .array_encoding(ArrayEncoding::NoBrackets)
            .bool_encoding(BoolEncoding::Literal)
            .query(&params(json!({ "id": [1, 2], "on": true })));
        assert_eq!(query, "id=1&id=2&on=true");
    }

    #[test]
    fn opaque_url_cannot_take_query() {
        let request = RequestDescriptor::parse(Method::GET, "mailto:someone@example.com").unwrap();
        let error = UrlEncoding::query_string()
            .encode(request, Some(&params(json!({ "a": 1 }))))
            .unwrap_err();
        assert!(matches!(
            error,
            Error::ParameterEncodingFailed(ParameterEncodingFailureReason::MissingUrl)
        ));
    }

    #[test]
    fn json_encoding_keeps_explicit_content_type() {
        let mut request = RequestDescriptor::parse(Method::POST, "https://example.com").unwrap();
        request
            .set_header("Content-Type", "application/vnd.api+json")
            .unwrap();
        let encoded = JsonEncoding::default()
            .encode(request, Some(&params(json!({ "a": 1 }))))
            .unwrap();
        assert_eq!(encoded.header(header::CONTENT_TYPE), Some("application/vnd.api+json"));
        assert_eq!(encoded.body.as_deref(), Some(&br#"{"a":1}"#[..]));
    }
}
