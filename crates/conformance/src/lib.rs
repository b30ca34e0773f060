//! # helios-conformance - FHIR R5 Conformance Harness
//!
//! This crate drives a running [FHIR RESTful API](https://hl7.org/fhir/http.html)
//! server as a black box. Scenarios issue interactions over HTTP, assert on
//! the responses, and leave the server as clean as they found it.
//!
//! ## Features
//!
//! - **Interaction Client**: One method per FHIR interaction, including conditional
//!   operations, history, batch/transaction and the purge endpoint
//! - **Query Builder**: Search parameters with modifiers, prefixes and OR-values,
//!   percent-encoded the way FHIR servers expect
//! - **Path Resolver**: Dotted paths (`name.0.family`) into response JSON
//! - **Assertion Engine**: Status, bundle, field and OperationOutcome assertions
//!   with server diagnostics in every failure
//! - **Resource Lifecycle Tracker**: Every resource a scenario creates is deleted
//!   again, even when the scenario fails or panics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use helios_conformance::assertions::{assert_bundle, assert_created, assert_field_equals};
//! use helios_conformance::{HarnessConfig, SearchSpec, run_scenario};
//! use serde_json::json;
//!
//! let config = HarnessConfig::from_env();
//! helios_conformance::init_logging(&config.log_level);
//!
//! run_scenario(&config, |client| {
//!     let patient = json!({"resourceType": "Patient", "name": [{"family": "Smith"}]});
//!     let response = client.create("Patient", &patient)?;
//!     let created = assert_created(&response)?;
//!     assert_field_equals(created, "name.0.family", "Smith")?;
//!
//!     let search = client.search("Patient", &SearchSpec::new().param("family", "Smith"))?;
//!     assert_bundle(&search, Some("Patient"))?;
//!     Ok(())
//! })
//! .unwrap();
//! ```
//!
//! ## Configuration
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FHIR_BASE_URL` | http://localhost:8080/fhir | Base URL of the server under test |
//!
//! ## Architecture
//!
//! - [`search`] - Query Builder
//! - [`client`] - Interaction Client and HTTP transport
//! - [`path`] - Path Resolver
//! - [`assertions`] - Assertion Engine and OperationOutcome decoding
//! - [`tracker`] - Resource Lifecycle Tracker and scenario helpers
//! - [`bundle`] - Bundle construction and response inspection
//! - [`resource`] - Resource identities
//! - [`config`] - Harness configuration
//! - [`error`] - Error types

// Enforce documentation
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod assertions;
pub mod bundle;
pub mod client;
pub mod config;
pub mod error;
pub mod path;
pub mod resource;
pub mod search;
pub mod tracker;


// Re-export commonly used types
pub use bundle::{BundleBuilder, BundleType};
pub use client::{FhirClient, HttpTransport, ReqwestTransport, ResponseEnvelope};
pub use config::HarnessConfig;
pub use error::{
    AssertionError, AssertionResult, CleanupError, CleanupFailure, HarnessError, HarnessResult,
    TransportError,
};
pub use path::{Resolved, resolve};
pub use resource::ResourceRef;
pub use search::{Modifier, Prefix, SearchSpec};
pub use tracker::{
    DrainReport, ResourceTracker, TrackedClient, TrackerState, run_scenario, run_scenario_with,
};

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` takes precedence over `level`. Calling this more than once
/// leaves the first subscriber in place.
///
/// # Arguments
///
/// * `level` - The log level (error, warn, info, debug, trace)
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_conformance={}", level)));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
