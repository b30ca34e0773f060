//! Error types for the conformance harness.
//!
//! The harness separates four families of failure:
//!
//! | Error | Raised by | Effect on the scenario |
//! |-------|-----------|------------------------|
//! | [`TransportError`] | interaction client | fatal, tracked resources are still drained |
//! | [`AssertionError`] | assertion engine | the test failure itself |
//! | [`CleanupFailure`] | drain | collected into one [`CleanupError`] |
//! | [`HarnessError`] | scenario helpers | umbrella over all of the above |
//!
//! HTTP 4xx/5xx responses are never errors at this layer. They come back as
//! ordinary [`ResponseEnvelope`](crate::client::ResponseEnvelope)s and are
//! judged by the assertion engine.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use serde_json::Value;
use thiserror::Error;

use crate::resource::ResourceRef;
use crate::tracker::{DrainReport, TrackerState};

/// Transport-level failures: the request never produced a usable HTTP response.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The base URL or a derived URL could not be parsed.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The request could not be built (missing id, unencodable body, bad header).
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {message}")]
    ClientSetup { message: String },

    /// Connection refused, DNS failure, TLS failure.
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    /// No complete response within the configured bound.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// The server answered with something that is not a readable HTTP response.
    #[error("malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },
}

/// Assertion failures raised by the assertion engine.
#[derive(Error, Debug)]
pub enum AssertionError {
    /// The response status is not one of the accepted codes.
    #[error(
        "expected status {}, got {actual}{}",
        format_codes(.expected),
        format_diagnostics(.diagnostics, .body_excerpt)
    )]
    UnexpectedStatus {
        expected: Vec<u16>,
        actual: u16,
        diagnostics: Option<String>,
        body_excerpt: String,
    },

    /// A path resolved to a value different from the expected one.
    #[error("expected {path} = {expected}, got {actual}")]
    FieldMismatch {
        path: String,
        expected: Value,
        actual: Value,
    },

    /// A path did not resolve.
    #[error("field path {path} not found (MISSING)")]
    FieldMissing { path: String },

    #[error("expected a Bundle, got {}", display_type(.actual))]
    NotABundle { actual: Option<String> },

    #[error("Bundle is missing its type field")]
    MissingBundleType,

    #[error("expected Bundle type {expected}, got {actual}")]
    BundleTypeMismatch { expected: String, actual: String },

    #[error("Bundle has no entry array but reports total {total}")]
    MissingEntries { total: u64 },

    #[error("expected {expected} in Bundle entry {index}, got {}", display_type(.actual))]
    EntryTypeMismatch {
        index: usize,
        expected: String,
        actual: Option<String>,
    },

    #[error("expected {expected} entries in Bundle, got {actual}")]
    EntryCountMismatch { expected: usize, actual: usize },

    #[error("Bundle does not contain resource with id={id}")]
    EntryNotFound { id: String },

    #[error("expected {expected}, got {}", display_type(.actual))]
    ResourceTypeMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("expected OperationOutcome, got {}", display_type(.actual))]
    NotAnOperationOutcome { actual: Option<String> },

    #[error("OperationOutcome has no issues")]
    EmptyOperationOutcome,

    #[error("expected issue with severity '{expected}', got {actual:?}")]
    MissingSeverity { expected: String, actual: Vec<String> },

    #[error("{name} header missing from response")]
    MissingHeader { name: String },

    #[error("response body is not usable: {message}")]
    InvalidBody { message: String },
}

/// A single deletion or purge that did not succeed during a drain.
#[derive(Error, Debug)]
pub enum CleanupFailure {
    #[error("delete of {target} returned status {status}{}", format_diagnostics(.diagnostics, &String::new()))]
    DeleteRejected {
        target: ResourceRef,
        status: u16,
        diagnostics: Option<String>,
    },

    #[error("delete of {target} failed: {source}")]
    DeleteTransport {
        target: ResourceRef,
        #[source]
        source: TransportError,
    },

    #[error("purge of {resource_type} returned status {status}")]
    PurgeRejected { resource_type: String, status: u16 },

    #[error("purge of {resource_type} failed: {source}")]
    PurgeTransport {
        resource_type: String,
        #[source]
        source: TransportError,
    },
}

/// Every failure of one drain, reported together once the sweep has finished.
#[derive(Error, Debug)]
#[error("cleanup left {} failure(s): {}", .failures.len(), format_failures(.failures))]
pub struct CleanupError {
    /// Failures in the order they were encountered.
    pub failures: Vec<CleanupFailure>,
    /// What the drain did manage to clean up.
    pub report: DrainReport,
}

/// Umbrella error for scenario-level helpers.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Assertion(#[from] AssertionError),

    #[error(transparent)]
    Cleanup(#[from] CleanupError),

    #[error("invalid configuration: {}", .problems.join("; "))]
    Config { problems: Vec<String> },

    /// A mutating interaction was attempted after the drain started.
    #[error("resource tracker no longer accepts interactions (state: {state})")]
    TrackerClosed { state: TrackerState },

    /// The scenario failed and its cleanup failed too.
    #[error("{scenario} (additionally, {cleanup})")]
    ScenarioWithCleanup {
        scenario: Box<HarnessError>,
        cleanup: CleanupError,
    },
}

/// Result type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Result type alias for assertions.
pub type AssertionResult<T> = Result<T, AssertionError>;

fn format_codes(codes: &[u16]) -> String {
    match codes {
        [single] => single.to_string(),
        _ => codes
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(" or "),
    }
}

fn format_diagnostics(diagnostics: &Option<String>, body_excerpt: &str) -> String {
    let mut out = String::new();
    if let Some(diagnostics) = diagnostics {
        out.push_str("\nOperationOutcome: ");
        out.push_str(diagnostics);
    }
    if !body_excerpt.is_empty() {
        out.push_str("\nResponse: ");
        out.push_str(body_excerpt);
    }
    out
}

fn display_type(actual: &Option<String>) -> &str {
    actual.as_deref().unwrap_or("<none>")
}

fn format_failures(failures: &[CleanupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
