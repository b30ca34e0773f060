//! Normalized response envelope.

use http::HeaderMap;
use http::header::{ETAG, LOCATION};
use serde_json::Value;

use crate::resource::resource_type_of;

/// One HTTP response from the server under test.
///
/// Built once per interaction and never mutated afterwards. 4xx and 5xx
/// responses are ordinary envelopes; judging them is the assertion engine's
/// job.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    status: u16,
    headers: HeaderMap,
    body: Option<Value>,
    raw_body: Vec<u8>,
}

impl ResponseEnvelope {
    /// Creates an envelope, decoding `raw_body` as JSON when possible.
    ///
    /// An empty body, or one that is not JSON, leaves [`body`](Self::body)
    /// absent; the bytes stay available through [`raw_body`](Self::raw_body).
    pub fn new(status: u16, headers: HeaderMap, raw_body: Vec<u8>) -> Self {
        let body = if raw_body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            serde_json::from_slice(&raw_body).ok()
        };

        Self {
            status,
            headers,
            body,
            raw_body,
        }
    }

    /// Creates an envelope from an already-decoded JSON body.
    pub fn from_json(status: u16, headers: HeaderMap, body: Value) -> Self {
        let raw_body = body.to_string().into_bytes();
        Self {
            status,
            headers,
            body: Some(body),
            raw_body,
        }
    }

    /// Returns the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns the `Location` header.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// Returns the `ETag` header.
    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG).and_then(|v| v.to_str().ok())
    }

    /// Returns the decoded JSON body.
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Returns the raw body bytes.
    pub fn raw_body(&self) -> &[u8] {
        &self.raw_body
    }

    /// Returns the raw body as (lossy) text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw_body).into_owned()
    }

    /// Returns the body's `resourceType`, if it has one.
    pub fn resource_type(&self) -> Option<&str> {
        self.body.as_ref().and_then(resource_type_of)
    }
}
