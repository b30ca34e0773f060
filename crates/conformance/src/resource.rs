//! Resource identities observed on the server under test.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;
use serde_json::Value;

/// The FHIR JSON media type used for `Accept` and `Content-Type`.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Identifies one server-side resource instance.
///
/// Equality and hashing only consider `(resource_type, id)`: two refs to
/// different versions of the same resource are the same identity.
#[derive(Debug, Clone, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    resource_type: String,
    id: String,
    version_id: Option<String>,
}

impl ResourceRef {
    /// Creates a reference without a version.
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: None,
        }
    }

    /// Returns a copy carrying the given version.
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Returns the resource type (e.g. `Patient`).
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the logical id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the version id, if one was observed.
    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }

    /// Returns the relative reference `Type/id`.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Extracts an identity from a resource body.
    ///
    /// Requires `resourceType` and `id`; `meta.versionId` is picked up when
    /// present.
    pub fn from_resource(resource: &Value) -> Option<Self> {
        let resource_type = resource_type_of(resource)?;
        let id = resource.get("id").and_then(Value::as_str)?;
        if id.is_empty() {
            return None;
        }

        let reference = Self::new(resource_type, id);
        match resource
            .get("meta")
            .and_then(|meta| meta.get("versionId"))
            .and_then(Value::as_str)
        {
            Some(version) => Some(reference.with_version(version)),
            None => Some(reference),
        }
    }

    /// Parses a `Location`/`Content-Location` value.
    ///
    /// Accepts absolute or relative forms:
    /// - `http://host/fhir/Patient/123/_history/2`
    /// - `Patient/123/_history/2`
    /// - `Patient/123`
    pub fn from_location(location: &str) -> Option<Self> {
        let path = location.split(['?', '#']).next().unwrap_or_default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let (type_idx, version) = match segments.iter().rposition(|s| *s == "_history") {
            Some(history_idx) if history_idx >= 2 => {
                (history_idx - 2, segments.get(history_idx + 1).copied())
            }
            Some(_) => return None,
            None if segments.len() >= 2 => (segments.len() - 2, None),
            None => return None,
        };

        let resource_type = segments[type_idx];
        let id = segments[type_idx + 1];
        if !is_resource_type_name(resource_type) {
            return None;
        }

        let reference = Self::new(resource_type, id);
        Some(match version {
            Some(version) => reference.with_version(version),
            None => reference,
        })
    }
}

impl PartialEq for ResourceRef {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type && self.id == other.id
    }
}

impl Hash for ResourceRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)?;
        if let Some(version) = &self.version_id {
            write!(f, "/_history/{}", version)?;
        }
        Ok(())
    }
}

/// Returns the `resourceType` discriminator of a JSON resource.
pub fn resource_type_of(resource: &Value) -> Option<&str> {
    resource.get("resourceType").and_then(Value::as_str)
}

/// FHIR resource type names are PascalCase ASCII identifiers.
fn is_resource_type_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}
