//! Bundle construction and inspection.
//!
//! Builds `transaction`/`batch` request bundles and reads the per-entry
//! outcomes of `transaction-response`/`batch-response` bundles.

use serde_json::{Value, json};
use uuid::Uuid;

use crate::resource::{ResourceRef, resource_type_of};
use crate::search::SearchSpec;

/// The `resourceType` marker every Bundle carries.
pub const BUNDLE_RESOURCE_TYPE: &str = "Bundle";

/// Bundle types as defined by FHIR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleType {
    /// Document bundle.
    Document,
    /// Message bundle.
    Message,
    /// Transaction request bundle.
    Transaction,
    /// Transaction response bundle.
    TransactionResponse,
    /// Batch request bundle.
    Batch,
    /// Batch response bundle.
    BatchResponse,
    /// Search results bundle.
    Searchset,
    /// History results bundle.
    History,
    /// Collection bundle.
    Collection,
}

impl BundleType {
    /// Returns the FHIR code string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleType::Document => "document",
            BundleType::Message => "message",
            BundleType::Transaction => "transaction",
            BundleType::TransactionResponse => "transaction-response",
            BundleType::Batch => "batch",
            BundleType::BatchResponse => "batch-response",
            BundleType::Searchset => "searchset",
            BundleType::History => "history",
            BundleType::Collection => "collection",
        }
    }

    /// Parses a FHIR code.
    pub fn parse(code: &str) -> Option<Self> {
        Some(match code {
            "document" => BundleType::Document,
            "message" => BundleType::Message,
            "transaction" => BundleType::Transaction,
            "transaction-response" => BundleType::TransactionResponse,
            "batch" => BundleType::Batch,
            "batch-response" => BundleType::BatchResponse,
            "searchset" => BundleType::Searchset,
            "history" => BundleType::History,
            "collection" => BundleType::Collection,
            _ => return None,
        })
    }
}

/// Search mode for bundle entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// Primary search result.
    Match,
    /// Included via _include.
    Include,
    /// Result of server-side processing.
    Outcome,
}

impl SearchMode {
    /// Returns the FHIR code string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Match => "match",
            SearchMode::Include => "include",
            SearchMode::Outcome => "outcome",
        }
    }

    /// Reads an entry's `search.mode`; entries without one count as matches.
    pub fn of_entry(entry: &Value) -> Option<Self> {
        match entry
            .get("search")
            .and_then(|s| s.get("mode"))
            .and_then(Value::as_str)
        {
            None | Some("match") => Some(SearchMode::Match),
            Some("include") => Some(SearchMode::Include),
            Some("outcome") => Some(SearchMode::Outcome),
            Some(_) => None,
        }
    }
}

/// Returns true if `body` carries the Bundle discriminator.
pub fn is_bundle(body: &Value) -> bool {
    resource_type_of(body) == Some(BUNDLE_RESOURCE_TYPE)
}

/// Returns the `entry` array, or an empty slice.
pub fn entries(bundle: &Value) -> &[Value] {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

/// The outcome of one entry in a batch/transaction response.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome<'a> {
    /// Position of the entry in the response bundle.
    pub index: usize,
    /// Numeric status parsed from `response.status` (e.g. `"201 Created"`).
    pub status: Option<u16>,
    /// `response.location`, if present.
    pub location: Option<&'a str>,
    /// The returned resource, if the server included it.
    pub resource: Option<&'a Value>,
}

impl EntryOutcome<'_> {
    /// Returns true if the entry reports `201 Created`.
    pub fn is_created(&self) -> bool {
        self.status == Some(201)
    }

    /// Returns the identity this entry refers to, preferring the returned
    /// resource and falling back to the location.
    pub fn resource_ref(&self) -> Option<ResourceRef> {
        self.resource
            .and_then(ResourceRef::from_resource)
            .or_else(|| self.location.and_then(ResourceRef::from_location))
    }
}

/// Reads the per-entry outcomes of a batch/transaction response.
pub fn entry_outcomes(bundle: &Value) -> Vec<EntryOutcome<'_>> {
    entries(bundle)
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            let response = entry.get("response");
            EntryOutcome {
                index,
                status: response
                    .and_then(|r| r.get("status"))
                    .and_then(Value::as_str)
                    .and_then(parse_status),
                location: response
                    .and_then(|r| r.get("location"))
                    .and_then(Value::as_str),
                resource: entry.get("resource"),
            }
        })
        .collect()
}

/// Parses the leading status code of `"201 Created"` / `"201"`.
pub fn parse_status(status: &str) -> Option<u16> {
    status.split_whitespace().next()?.parse().ok()
}

/// Builder for transaction and batch request bundles.
#[derive(Debug)]
pub struct BundleBuilder {
    bundle_type: BundleType,
    entries: Vec<Value>,
}

impl BundleBuilder {
    /// Creates a new builder for a specific bundle type.
    pub fn new(bundle_type: BundleType) -> Self {
        Self {
            bundle_type,
            entries: Vec::new(),
        }
    }

    /// Creates a transaction bundle builder.
    pub fn transaction() -> Self {
        Self::new(BundleType::Transaction)
    }

    /// Creates a batch bundle builder.
    pub fn batch() -> Self {
        Self::new(BundleType::Batch)
    }

    /// Returns a fresh `urn:uuid:` placeholder for intra-bundle references.
    pub fn temporary_id() -> String {
        format!("urn:uuid:{}", Uuid::new_v4())
    }

    /// Adds a `POST [type]` entry with a generated `fullUrl`.
    pub fn post(self, resource: Value) -> Self {
        self.post_with_full_url(resource, Self::temporary_id())
    }

    /// Adds a `POST [type]` entry with a caller-chosen `fullUrl`, so other
    /// entries can reference it.
    pub fn post_with_full_url(mut self, resource: Value, full_url: impl Into<String>) -> Self {
        let url = resource_type_of(&resource).unwrap_or_default().to_string();
        self.entries.push(json!({
            "fullUrl": full_url.into(),
            "resource": resource,
            "request": {"method": "POST", "url": url}
        }));
        self
    }

    /// Adds a conditional `POST` entry (`ifNoneExist`).
    pub fn post_conditional(mut self, resource: Value, criteria: &SearchSpec) -> Self {
        let url = resource_type_of(&resource).unwrap_or_default().to_string();
        self.entries.push(json!({
            "fullUrl": Self::temporary_id(),
            "resource": resource,
            "request": {
                "method": "POST",
                "url": url,
                "ifNoneExist": criteria.to_criteria()
            }
        }));
        self
    }

    /// Adds a `PUT [type]/[id]` entry, type and id taken from the resource.
    pub fn put(mut self, resource: Value) -> Self {
        let url = ResourceRef::from_resource(&resource)
            .map(|r| r.reference())
            .unwrap_or_default();
        self.entries.push(json!({
            "resource": resource,
            "request": {"method": "PUT", "url": url}
        }));
        self
    }

    /// Adds a `DELETE [type]/[id]` entry.
    pub fn delete(mut self, resource_type: &str, id: &str) -> Self {
        self.entries.push(json!({
            "request": {"method": "DELETE", "url": format!("{}/{}", resource_type, id)}
        }));
        self
    }

    /// Adds a `GET [url]` entry.
    pub fn get(mut self, url: impl Into<String>) -> Self {
        self.entries.push(json!({
            "request": {"method": "GET", "url": url.into()}
        }));
        self
    }

    /// Builds the Bundle resource.
    pub fn build(self) -> Value {
        json!({
            "resourceType": BUNDLE_RESOURCE_TYPE,
            "type": self.bundle_type.as_str(),
            "entry": self.entries
        })
    }
}
