//! Interaction client for the FHIR RESTful API.
//!
//! One method per [FHIR interaction](https://hl7.org/fhir/http.html). Every
//! method returns a [`ResponseEnvelope`] regardless of the HTTP status; only
//! transport failures are errors.
//!
//! | Interaction | HTTP Method | URL Pattern |
//! |------------|-------------|-------------|
//! | create | POST | `[base]/[type]` |
//! | read | GET | `[base]/[type]/[id]` |
//! | vread | GET | `[base]/[type]/[id]/_history/[vid]` |
//! | update | PUT | `[base]/[type]/[id]` |
//! | delete | DELETE | `[base]/[type]/[id]` |
//! | search | GET | `[base]/[type]?params` |
//! | history (instance) | GET | `[base]/[type]/[id]/_history` |
//! | history (type) | GET | `[base]/[type]/_history` |
//! | history (system) | GET | `[base]/_history` |
//! | conditional create | POST + `If-None-Exist` | `[base]/[type]` |
//! | conditional update | PUT | `[base]/[type]?params` |
//! | conditional delete | DELETE | `[base]/[type]?params` |
//! | batch/transaction | POST | `[base]` |
//! | purge | GET | `[base]/purgeschema/[type]/[key]` |

mod envelope;
mod transport;

pub use envelope::ResponseEnvelope;
pub use transport::{FhirRequest, HttpTransport, ReqwestTransport};

use http::header::{HeaderName, IF_MATCH};
use http::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bundle::BundleType;
use crate::config::HarnessConfig;
use crate::error::TransportError;
use crate::resource::resource_type_of;
use crate::search::SearchSpec;

/// Precondition header for conditional create.
pub const IF_NONE_EXIST: HeaderName = HeaderName::from_static("if-none-exist");

/// Blocking client for one FHIR server.
///
/// Requests are issued one at a time; each call waits for the full response.
#[derive(Debug, Clone)]
pub struct FhirClient<T = ReqwestTransport> {
    base_url: String,
    transport: T,
}

impl FhirClient<ReqwestTransport> {
    /// Creates a client for the configured server.
    pub fn new(config: &HarnessConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::from_config(config)?;
        Self::with_transport(&config.base_url, transport)
    }
}

impl<T: HttpTransport> FhirClient<T> {
    /// Creates a client over a custom transport.
    ///
    /// The base URL must be an absolute http(s) URL. A trailing slash is
    /// accepted and stripped.
    pub fn with_transport(base_url: &str, transport: T) -> Result<Self, TransportError> {
        let parsed = url::Url::parse(base_url).map_err(|e| TransportError::InvalidUrl {
            url: base_url.to_string(),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl {
                url: base_url.to_string(),
                message: "base URL must be an absolute http(s) URL".to_string(),
            });
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
        })
    }

    /// Returns the base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Joins `path` onto the base URL.
    ///
    /// `http://h/fhir` + `Patient` gives `http://h/fhir/Patient`; slashes on
    /// either side are never doubled or dropped.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn search_url(&self, resource_type: &str, params: &SearchSpec) -> String {
        with_query(self.url(resource_type), params)
    }

    fn send(&self, request: FhirRequest) -> Result<ResponseEnvelope, TransportError> {
        debug!(method = %request.method, url = %request.url, "Sending FHIR request");
        self.transport.execute(request)
    }

    /// `POST [base]/[type]`
    pub fn create(
        &self,
        resource_type: &str,
        resource: &Value,
    ) -> Result<ResponseEnvelope, TransportError> {
        let resource_type = path_segment("resource type", resource_type)?;
        self.send(FhirRequest::new(Method::POST, self.url(resource_type)).with_body(resource.clone()))
    }

    /// Creates a resource, taking the type from its `resourceType`.
    ///
    /// A `Bundle` is posted to `[base]` so the server processes it as a
    /// batch or transaction.
    pub fn create_resource(&self, resource: &Value) -> Result<ResponseEnvelope, TransportError> {
        match resource_type_of(resource) {
            Some("Bundle") => self.post_bundle(resource),
            Some(resource_type) => self.create(resource_type, resource),
            None => Err(TransportError::InvalidRequest {
                message: "resource must contain resourceType".to_string(),
            }),
        }
    }

    /// `GET [base]/[type]/[id]`
    pub fn read(&self, resource_type: &str, id: &str) -> Result<ResponseEnvelope, TransportError> {
        let path = instance_path(resource_type, id)?;
        self.send(FhirRequest::new(Method::GET, self.url(&path)))
    }

    /// `GET [base]/[type]/[id]/_history/[vid]`
    pub fn vread(
        &self,
        resource_type: &str,
        id: &str,
        version_id: &str,
    ) -> Result<ResponseEnvelope, TransportError> {
        let path = format!(
            "{}/_history/{}",
            instance_path(resource_type, id)?,
            path_segment("version id", version_id)?
        );
        self.send(FhirRequest::new(Method::GET, self.url(&path)))
    }

    /// `PUT [base]/[type]/[id]`, type and id taken from the body.
    ///
    /// `meta.versionId` is sent as-is; bumping it is the server's job.
    pub fn update(&self, resource: &Value) -> Result<ResponseEnvelope, TransportError> {
        self.send(self.update_request(resource)?)
    }

    /// Update guarded by `If-Match` (optimistic locking).
    pub fn update_if_match(
        &self,
        resource: &Value,
        etag: &str,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.send(self.update_request(resource)?.with_header(IF_MATCH, etag)?)
    }

    fn update_request(&self, resource: &Value) -> Result<FhirRequest, TransportError> {
        let resource_type = resource_type_of(resource).ok_or_else(|| {
            TransportError::InvalidRequest {
                message: "update requires resourceType in the body".to_string(),
            }
        })?;
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::InvalidRequest {
                message: format!("update of {} requires an id in the body", resource_type),
            })?;

        let path = instance_path(resource_type, id)?;
        Ok(FhirRequest::new(Method::PUT, self.url(&path)).with_body(resource.clone()))
    }

    /// `DELETE [base]/[type]/[id]`
    pub fn delete(&self, resource_type: &str, id: &str) -> Result<ResponseEnvelope, TransportError> {
        let path = instance_path(resource_type, id)?;
        self.send(FhirRequest::new(Method::DELETE, self.url(&path)))
    }

    /// `GET [base]/[type]?params`
    pub fn search(
        &self,
        resource_type: &str,
        params: &SearchSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        let resource_type = path_segment("resource type", resource_type)?;
        self.send(FhirRequest::new(Method::GET, self.search_url(resource_type, params)))
    }

    /// `GET [base]/[type]/_history` or `GET [base]/[type]/[id]/_history`
    pub fn history(
        &self,
        resource_type: &str,
        id: Option<&str>,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.history_with(resource_type, id, &SearchSpec::new())
    }

    /// Instance or type history with paging/filter parameters (`_count`, `_since`).
    pub fn history_with(
        &self,
        resource_type: &str,
        id: Option<&str>,
        params: &SearchSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        let path = match id {
            Some(id) => format!("{}/_history", instance_path(resource_type, id)?),
            None => format!("{}/_history", path_segment("resource type", resource_type)?),
        };
        self.send(FhirRequest::new(Method::GET, with_query(self.url(&path), params)))
    }

    /// `GET [base]/[type]/_history`
    pub fn type_history(
        &self,
        resource_type: &str,
        params: &SearchSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.history_with(resource_type, None, params)
    }

    /// `GET [base]/_history`
    pub fn system_history(&self, params: &SearchSpec) -> Result<ResponseEnvelope, TransportError> {
        self.send(FhirRequest::new(
            Method::GET,
            with_query(self.url("_history"), params),
        ))
    }

    /// `POST [base]/[type]` with `If-None-Exist: <criteria>`.
    pub fn conditional_create(
        &self,
        resource_type: &str,
        resource: &Value,
        criteria: &SearchSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        let resource_type = path_segment("resource type", resource_type)?;
        let request = FhirRequest::new(Method::POST, self.url(resource_type))
            .with_body(resource.clone())
            .with_header(IF_NONE_EXIST, &criteria.to_criteria())?;
        self.send(request)
    }

    /// `PUT [base]/[type]?criteria`
    pub fn conditional_update(
        &self,
        resource_type: &str,
        criteria: &SearchSpec,
        resource: &Value,
    ) -> Result<ResponseEnvelope, TransportError> {
        let resource_type = path_segment("resource type", resource_type)?;
        self.send(
            FhirRequest::new(Method::PUT, self.search_url(resource_type, criteria))
                .with_body(resource.clone()),
        )
    }

    /// `DELETE [base]/[type]?criteria`
    pub fn conditional_delete(
        &self,
        resource_type: &str,
        criteria: &SearchSpec,
    ) -> Result<ResponseEnvelope, TransportError> {
        let resource_type = path_segment("resource type", resource_type)?;
        self.send(FhirRequest::new(
            Method::DELETE,
            self.search_url(resource_type, criteria),
        ))
    }

    /// `POST [base]` with a `transaction` bundle.
    pub fn transaction(&self, bundle: &Value) -> Result<ResponseEnvelope, TransportError> {
        warn_on_bundle_type(bundle, BundleType::Transaction);
        self.post_bundle(bundle)
    }

    /// `POST [base]` with a `batch` bundle.
    pub fn batch(&self, bundle: &Value) -> Result<ResponseEnvelope, TransportError> {
        warn_on_bundle_type(bundle, BundleType::Batch);
        self.post_bundle(bundle)
    }

    fn post_bundle(&self, bundle: &Value) -> Result<ResponseEnvelope, TransportError> {
        self.send(FhirRequest::new(Method::POST, self.url("")).with_body(bundle.clone()))
    }

    /// `GET [base]/purgeschema/[type]/[key]`
    pub fn purge(&self, resource_type: &str, key: &str) -> Result<ResponseEnvelope, TransportError> {
        let path = format!(
            "purgeschema/{}/{}",
            path_segment("resource type", resource_type)?,
            path_segment("purge key", key)?
        );
        self.send(FhirRequest::new(Method::GET, self.url(&path)))
    }

    /// `GET` an absolute URL handed out by the server (e.g. a Bundle `next` link).
    pub fn get_url(&self, url: &str) -> Result<ResponseEnvelope, TransportError> {
        url::Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        self.send(FhirRequest::new(Method::GET, url))
    }
}

fn with_query(url: String, params: &SearchSpec) -> String {
    if params.is_empty() {
        url
    } else {
        format!("{}?{}", url, params.to_query_string())
    }
}

fn instance_path(resource_type: &str, id: &str) -> Result<String, TransportError> {
    Ok(format!(
        "{}/{}",
        path_segment("resource type", resource_type)?,
        path_segment("id", id)?
    ))
}

/// Rejects values that would change the shape of the URL path.
fn path_segment<'a>(what: &str, value: &'a str) -> Result<&'a str, TransportError> {
    if value.is_empty() || value.contains(['/', '?', '#']) {
        return Err(TransportError::InvalidRequest {
            message: format!("invalid {} '{}'", what, value),
        });
    }
    Ok(value)
}

fn warn_on_bundle_type(bundle: &Value, expected: BundleType) {
    let actual = bundle.get("type").and_then(Value::as_str);
    if actual != Some(expected.as_str()) {
        warn!(
            expected = expected.as_str(),
            actual = ?actual,
            "Bundle type does not match the interaction"
        );
    }
}
