//! Response assertions.
//!
//! Each assertion takes a [`ResponseEnvelope`] (or an already-extracted
//! resource) and either returns the decoded body / sub-part, or an
//! [`AssertionError`] describing the mismatch. Status failures carry the
//! server's OperationOutcome diagnostics when it sent one.
//!
//! Where servers legitimately differ, the accepted codes are sets:
//!
//! | Assertion | Accepted status |
//! |-----------|-----------------|
//! | [`assert_created`] | 201 |
//! | [`assert_success`] / [`assert_read`] | 200 |
//! | [`assert_updated`] | 200, 201 |
//! | [`assert_deleted`] | 200, 204 |
//! | [`assert_not_found`] | 404, 410 |
//! | [`assert_conflict`] | 409, 412 |
//! | [`assert_bad_request`] | 400 |

pub mod outcome;

pub use outcome::{IssueSeverity, OperationOutcome};

use http::header::LOCATION;
use serde_json::Value;

use crate::bundle::{self, BundleType, SearchMode};
use crate::client::ResponseEnvelope;
use crate::error::{AssertionError, AssertionResult};
use crate::path::{Resolved, resolve};
use crate::resource::resource_type_of;

/// `201 Created`
pub const CREATED: &[u16] = &[201];
/// `200 OK`
pub const OK: &[u16] = &[200];
/// Update of an existing resource, or update-as-create.
pub const UPDATED: &[u16] = &[200, 201];
/// Delete with or without a body.
pub const DELETED: &[u16] = &[200, 204];
/// Never existed, or deleted.
pub const NOT_FOUND: &[u16] = &[404, 410];
/// Version conflict or failed precondition.
pub const CONFLICT: &[u16] = &[409, 412];
/// `400 Bad Request`
pub const BAD_REQUEST: &[u16] = &[400];

const BODY_EXCERPT_LIMIT: usize = 500;

/// Asserts the status is one of `expected`.
pub fn assert_status(envelope: &ResponseEnvelope, expected: &[u16]) -> AssertionResult<()> {
    if expected.contains(&envelope.status()) {
        return Ok(());
    }

    let diagnostics = envelope
        .body()
        .and_then(OperationOutcome::from_value)
        .and_then(|outcome| outcome.first_diagnostic());

    Err(AssertionError::UnexpectedStatus {
        expected: expected.to_vec(),
        actual: envelope.status(),
        diagnostics,
        body_excerpt: excerpt(&envelope.text()),
    })
}

/// Asserts `201 Created` with a `Location` header and returns the body.
pub fn assert_created(envelope: &ResponseEnvelope) -> AssertionResult<&Value> {
    assert_status(envelope, CREATED)?;
    assert_header(envelope, LOCATION.as_str())?;
    require_body(envelope)
}

/// Asserts `200 OK` and returns the body.
pub fn assert_success(envelope: &ResponseEnvelope) -> AssertionResult<&Value> {
    assert_status(envelope, OK)?;
    require_body(envelope)
}

/// Asserts `200 OK` with a body of the given resource type.
pub fn assert_read<'a>(
    envelope: &'a ResponseEnvelope,
    resource_type: &str,
) -> AssertionResult<&'a Value> {
    let body = assert_success(envelope)?;
    assert_resource_type(body, resource_type)?;
    Ok(body)
}

/// Asserts `200` or `201` and returns the body.
pub fn assert_updated(envelope: &ResponseEnvelope) -> AssertionResult<&Value> {
    assert_status(envelope, UPDATED)?;
    require_body(envelope)
}

/// Asserts `200` or `204`.
pub fn assert_deleted(envelope: &ResponseEnvelope) -> AssertionResult<()> {
    assert_status(envelope, DELETED)
}

/// Asserts `404` or `410` with an OperationOutcome body.
pub fn assert_not_found(envelope: &ResponseEnvelope) -> AssertionResult<&Value> {
    assert_status(envelope, NOT_FOUND)?;
    let body = require_body(envelope)?;
    require_operation_outcome(body)?;
    Ok(body)
}

/// Asserts `409` or `412`.
pub fn assert_conflict(envelope: &ResponseEnvelope) -> AssertionResult<()> {
    assert_status(envelope, CONFLICT)
}

/// Asserts `400` with an OperationOutcome body.
pub fn assert_bad_request(envelope: &ResponseEnvelope) -> AssertionResult<&Value> {
    assert_status(envelope, BAD_REQUEST)?;
    let body = require_body(envelope)?;
    require_operation_outcome(body)?;
    Ok(body)
}

/// Asserts a `200` Bundle response and returns the bundle.
///
/// The body must carry the Bundle discriminator and a `type`, and must
/// have an `entry` array unless `total` is 0. If `entry_type` is given,
/// every primary result (search mode `match` or unset) must be of that type;
/// `_include`d entries are not checked.
pub fn assert_bundle<'a>(
    envelope: &'a ResponseEnvelope,
    entry_type: Option<&str>,
) -> AssertionResult<&'a Value> {
    assert_status(envelope, OK)?;
    let body = require_body(envelope)?;

    if !bundle::is_bundle(body) {
        return Err(AssertionError::NotABundle {
            actual: resource_type_of(body).map(str::to_string),
        });
    }
    if body.get("type").and_then(Value::as_str).is_none() {
        return Err(AssertionError::MissingBundleType);
    }
    if body.get("entry").is_none() {
        let total = body.get("total").and_then(Value::as_u64).unwrap_or(0);
        if total != 0 {
            return Err(AssertionError::MissingEntries { total });
        }
    }

    if let Some(expected) = entry_type {
        for (index, entry) in bundle::entries(body).iter().enumerate() {
            if SearchMode::of_entry(entry) != Some(SearchMode::Match) {
                continue;
            }
            let actual = entry.get("resource").and_then(resource_type_of);
            if actual != Some(expected) {
                return Err(AssertionError::EntryTypeMismatch {
                    index,
                    expected: expected.to_string(),
                    actual: actual.map(str::to_string),
                });
            }
        }
    }

    Ok(body)
}

/// Asserts the bundle's `type`.
pub fn assert_bundle_type(bundle: &Value, expected: BundleType) -> AssertionResult<()> {
    let actual = bundle
        .get("type")
        .and_then(Value::as_str)
        .ok_or(AssertionError::MissingBundleType)?;
    if actual != expected.as_str() {
        return Err(AssertionError::BundleTypeMismatch {
            expected: expected.as_str().to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Asserts the number of entries in a bundle.
pub fn assert_bundle_count(bundle: &Value, expected: usize) -> AssertionResult<()> {
    let actual = bundle::entries(bundle).len();
    if actual != expected {
        return Err(AssertionError::EntryCountMismatch { expected, actual });
    }
    Ok(())
}

/// Asserts the bundle contains a resource with `id` and returns that resource.
pub fn assert_bundle_contains<'a>(bundle: &'a Value, id: &str) -> AssertionResult<&'a Value> {
    bundle::entries(bundle)
        .iter()
        .filter_map(|entry| entry.get("resource"))
        .find(|resource| resource.get("id").and_then(Value::as_str) == Some(id))
        .ok_or_else(|| AssertionError::EntryNotFound { id: id.to_string() })
}

/// Asserts that `path` resolves and returns the value.
pub fn assert_has_field<'a>(resource: &'a Value, path: &str) -> AssertionResult<&'a Value> {
    match resolve(resource, path) {
        Resolved::Found(value) => Ok(value),
        Resolved::Missing => Err(AssertionError::FieldMissing {
            path: path.to_string(),
        }),
    }
}

/// Asserts that `path` resolves to `expected` and returns the value.
pub fn assert_field_equals<'a>(
    resource: &'a Value,
    path: &str,
    expected: impl Into<Value>,
) -> AssertionResult<&'a Value> {
    let expected = expected.into();
    let actual = assert_has_field(resource, path)?;
    if *actual != expected {
        return Err(AssertionError::FieldMismatch {
            path: path.to_string(),
            expected,
            actual: actual.clone(),
        });
    }
    Ok(actual)
}

/// Asserts the body's `resourceType`.
pub fn assert_resource_type(resource: &Value, expected: &str) -> AssertionResult<()> {
    let actual = resource_type_of(resource);
    if actual != Some(expected) {
        return Err(AssertionError::ResourceTypeMismatch {
            expected: expected.to_string(),
            actual: actual.map(str::to_string),
        });
    }
    Ok(())
}

/// Asserts the body is an OperationOutcome with at least one issue and,
/// if `severity` is given, at least one issue of that severity.
pub fn assert_operation_outcome(
    envelope: &ResponseEnvelope,
    severity: Option<IssueSeverity>,
) -> AssertionResult<OperationOutcome> {
    let body = require_body(envelope)?;
    let outcome = require_operation_outcome(body)?;

    if let Some(severity) = severity {
        if !outcome.has_severity(severity) {
            return Err(AssertionError::MissingSeverity {
                expected: severity.as_str().to_string(),
                actual: outcome.severities(),
            });
        }
    }

    Ok(outcome)
}

/// Asserts a response header is present and returns its value.
pub fn assert_header<'a>(envelope: &'a ResponseEnvelope, name: &str) -> AssertionResult<&'a str> {
    envelope
        .header(name)
        .ok_or_else(|| AssertionError::MissingHeader {
            name: name.to_string(),
        })
}

fn require_body(envelope: &ResponseEnvelope) -> AssertionResult<&Value> {
    envelope.body().ok_or_else(|| AssertionError::InvalidBody {
        message: format!(
            "status {} response has no JSON body: {}",
            envelope.status(),
            excerpt(&envelope.text())
        ),
    })
}

fn require_operation_outcome(body: &Value) -> AssertionResult<OperationOutcome> {
    let outcome =
        OperationOutcome::from_value(body).ok_or_else(|| AssertionError::NotAnOperationOutcome {
            actual: resource_type_of(body).map(str::to_string),
        })?;
    if outcome.issue.is_empty() {
        return Err(AssertionError::EmptyOperationOutcome);
    }
    Ok(outcome)
}

fn excerpt(text: &str) -> String {
    text.chars().take(BODY_EXCERPT_LIMIT).collect()
}
