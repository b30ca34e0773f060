//! OperationOutcome decoding.
//!
//! Servers report errors as FHIR
//! [OperationOutcome](https://hl7.org/fhir/operationoutcome.html) resources.
//! The harness only reads them, to put diagnostics into failure messages and
//! to check issue severities.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;

/// The `resourceType` of an OperationOutcome.
pub const OPERATION_OUTCOME: &str = "OperationOutcome";

/// Issue severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Fatal error - processing cannot continue.
    Fatal,
    /// Error - processing has failed.
    Error,
    /// Warning - processing succeeded but with concerns.
    Warning,
    /// Information - informational message.
    Information,
}

impl IssueSeverity {
    /// Returns the FHIR string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSeverity::Fatal => "fatal",
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Information => "information",
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded OperationOutcome.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    /// Always `OperationOutcome`.
    pub resource_type: String,
    /// The reported issues.
    #[serde(default)]
    pub issue: Vec<Issue>,
}

/// One issue of an OperationOutcome.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    /// `fatal | error | warning | information`.
    pub severity: Option<String>,
    /// Issue type code (e.g. `not-found`).
    pub code: Option<String>,
    /// Free-text diagnostics.
    pub diagnostics: Option<String>,
    /// Coded details; only the text is read.
    pub details: Option<IssueDetails>,
}

/// The `details` element of an issue.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueDetails {
    /// Human-readable text.
    pub text: Option<String>,
}

impl Issue {
    /// Returns `diagnostics`, falling back to `details.text`.
    pub fn message(&self) -> Option<&str> {
        self.diagnostics
            .as_deref()
            .or_else(|| self.details.as_ref().and_then(|d| d.text.as_deref()))
    }
}

impl OperationOutcome {
    /// Decodes `body` if it is an OperationOutcome.
    pub fn from_value(body: &Value) -> Option<Self> {
        if body.get("resourceType").and_then(Value::as_str) != Some(OPERATION_OUTCOME) {
            return None;
        }
        serde_json::from_value(body.clone()).ok()
    }

    /// Returns the first issue's message, or `No details` when the first
    /// issue has none.
    pub fn first_diagnostic(&self) -> Option<String> {
        self.issue
            .first()
            .map(|issue| issue.message().unwrap_or("No details").to_string())
    }

    /// Returns the severities of all issues, in order.
    pub fn severities(&self) -> Vec<String> {
        self.issue
            .iter()
            .filter_map(|issue| issue.severity.clone())
            .collect()
    }

    /// Returns true if any issue has the given severity.
    pub fn has_severity(&self, severity: IssueSeverity) -> bool {
        self.issue
            .iter()
            .any(|issue| issue.severity.as_deref() == Some(severity.as_str()))
    }
}
