//! HTTP transport seam.
//!
//! [`FhirClient`](super::FhirClient) builds [`FhirRequest`]s and hands them to
//! an [`HttpTransport`]. Production code uses [`ReqwestTransport`]; tests can
//! plug in an in-process transport that records requests.

use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde_json::Value;
use tracing::{debug, trace};

use super::ResponseEnvelope;
use crate::config::HarnessConfig;
use crate::error::TransportError;
use crate::resource::FHIR_JSON;

/// A fully resolved request, ready to send.
#[derive(Debug, Clone)]
pub struct FhirRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including any query string.
    pub url: String,
    /// Extra headers (precondition headers and the like).
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl FhirRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header, rejecting values that are not valid header text.
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Result<Self, TransportError> {
        let value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidRequest {
            message: format!("invalid {} header value '{}': {}", name, value, e),
        })?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Sends one request and waits for the complete response.
///
/// Implementations must not turn HTTP error statuses into errors; only
/// failures to obtain a response at all are [`TransportError`]s.
pub trait HttpTransport: Send + Sync {
    /// Executes the request.
    fn execute(&self, request: FhirRequest) -> Result<ResponseEnvelope, TransportError>;
}

/// Blocking `reqwest` transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Creates a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("helios-conformance/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::ClientSetup {
                message: e.to_string(),
            })?;

        Ok(Self { client, timeout })
    }

    /// Creates a transport using the configured request timeout.
    pub fn from_config(config: &HarnessConfig) -> Result<Self, TransportError> {
        Self::new(Duration::from_secs(config.request_timeout))
    }

    fn classify(&self, url: &str, err: reqwest::Error) -> TransportError {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }
        } else if err.is_connect() {
            TransportError::Connect {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else if err.is_builder() {
            TransportError::InvalidUrl {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            TransportError::MalformedResponse {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl HttpTransport for ReqwestTransport {
    fn execute(&self, request: FhirRequest) -> Result<ResponseEnvelope, TransportError> {
        let FhirRequest {
            method,
            url,
            headers,
            body,
        } = request;

        let mut builder = self
            .client
            .request(method, &url)
            .header(ACCEPT, FHIR_JSON)
            .headers(headers);

        if let Some(body) = body {
            let bytes = serde_json::to_vec(&body).map_err(|e| TransportError::InvalidRequest {
                message: format!("failed to encode request body: {}", e),
            })?;
            builder = builder.header(CONTENT_TYPE, FHIR_JSON).body(bytes);
        }

        let response = builder.send().map_err(|e| self.classify(&url, e))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let raw_body = response.bytes().map_err(|e| self.classify(&url, e))?;

        debug!(url = %url, status, bytes = raw_body.len(), "Received response");
        trace!(body = %String::from_utf8_lossy(&raw_body), "Response body");

        Ok(ResponseEnvelope::new(status, headers, raw_body.to_vec()))
    }
}
