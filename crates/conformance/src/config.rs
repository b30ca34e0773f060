//! Harness configuration.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FHIR_BASE_URL` | http://localhost:8080/fhir | Base URL of the server under test |
//!
//! Everything else is set programmatically or on the command line.
//!
//! # Example
//!
//! ```rust
//! use helios_conformance::HarnessConfig;
//!
//! // Create from environment
//! let config = HarnessConfig::from_env();
//!
//! // Or create programmatically
//! let config = HarnessConfig {
//!     base_url: "http://fhir.example.org/r5".to_string(),
//!     purge_on_cleanup: false,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::sync::OnceLock;

use clap::Parser;

/// Default base URL of the server under test.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/fhir";

/// Default key for the purge endpoint.
pub const DEFAULT_PURGE_KEY: &str = "c522382c-8656-463e-8277-b913e4466f53";

/// Configuration for one harness run.
#[derive(Debug, Clone, Parser)]
#[command(name = "helios-conformance")]
#[command(about = "FHIR R5 conformance harness")]
pub struct HarnessConfig {
    /// Base URL of the FHIR server under test.
    #[arg(long, env = "FHIR_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[arg(long, default_value = "30")]
    pub request_timeout: u64,

    /// Key passed to the purge endpoint.
    #[arg(long, default_value = DEFAULT_PURGE_KEY)]
    pub purge_key: String,

    /// Purge resource types after soft-deleting tracked resources.
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    pub purge_on_cleanup: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: 30,
            purge_key: DEFAULT_PURGE_KEY.to_string(),
            purge_on_cleanup: true,
            log_level: "info".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Reads the configuration from the environment.
    ///
    /// The environment is read on the first call only; later calls return a
    /// copy of that first result. Program arguments are ignored, so test
    /// runner flags such as `--nocapture` never reach the parser.
    pub fn from_env() -> Self {
        static FROM_ENV: OnceLock<HarnessConfig> = OnceLock::new();
        Self::read_once(&FROM_ENV, || {
            Self::try_parse_from(["helios-conformance"]).unwrap_or_default()
        })
    }

    fn read_once(cell: &OnceLock<Self>, read: impl FnOnce() -> Self) -> Self {
        cell.get_or_init(read).clone()
    }

    /// Creates a configuration for a server at `base_url` with a short timeout.
    pub fn for_testing(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: 5, // Shorter timeout for tests
            log_level: "debug".to_string(),
            ..Default::default()
        }
    }

    /// Validates the configuration and returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.base_url.trim().is_empty() {
            errors.push("Base URL cannot be empty".to_string());
        } else {
            match url::Url::parse(&self.base_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "Base URL must use http or https, got '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!("Base URL '{}' is invalid: {}", self.base_url, e)),
            }
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if self.purge_key.trim().is_empty() {
            errors.push("Purge key cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
