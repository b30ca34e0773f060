//! Scenario-scoped client with guaranteed cleanup.

use serde_json::Value;
use tracing::{error, info};

use super::{DrainReport, ResourceTracker, TrackerState};
use crate::client::{FhirClient, HttpTransport, ReqwestTransport, ResponseEnvelope};
use crate::config::HarnessConfig;
use crate::error::{CleanupError, HarnessError, HarnessResult};
use crate::resource::{ResourceRef, resource_type_of};
use crate::search::SearchSpec;

/// A [`FhirClient`] whose mutating interactions feed a [`ResourceTracker`].
///
/// Call [`finish`](Self::finish) at the end of a scenario to drain and see
/// the result. If the client is dropped without finishing (early return,
/// panic), it drains in `Drop` and logs any cleanup failure.
#[derive(Debug)]
pub struct TrackedClient<T: HttpTransport = ReqwestTransport> {
    client: FhirClient<T>,
    tracker: ResourceTracker,
}

impl TrackedClient<ReqwestTransport> {
    /// Validates `config` and creates a client with a fresh tracker.
    pub fn new(config: &HarnessConfig) -> HarnessResult<Self> {
        config
            .validate()
            .map_err(|problems| HarnessError::Config { problems })?;
        let client = FhirClient::new(config)?;
        Ok(Self::from_parts(client, ResourceTracker::from_config(config)))
    }
}

impl<T: HttpTransport> TrackedClient<T> {
    /// Combines an existing client and tracker.
    pub fn from_parts(client: FhirClient<T>, tracker: ResourceTracker) -> Self {
        info!(
            scenario = %tracker.scenario_id(),
            base_url = %client.base_url(),
            "Scenario started"
        );
        Self { client, tracker }
    }

    /// The untracked client, for reads and searches.
    pub fn client(&self) -> &FhirClient<T> {
        &self.client
    }

    /// The tracker.
    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    /// Tracks an identity the scenario created some other way.
    pub fn track(&mut self, resource: ResourceRef) -> HarnessResult<bool> {
        self.ensure_active()?;
        Ok(self.tracker.track(resource))
    }

    fn ensure_active(&self) -> HarnessResult<()> {
        match self.tracker.state() {
            TrackerState::Active => Ok(()),
            state => Err(HarnessError::TrackerClosed { state }),
        }
    }

    /// Tracked `create`.
    pub fn create(&mut self, resource_type: &str, resource: &Value) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.create(resource_type, resource)?;
        self.tracker.observe_created(&envelope);
        Ok(envelope)
    }

    /// Tracked create by `resourceType`; bundles are tracked entry by entry.
    pub fn create_resource(&mut self, resource: &Value) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.create_resource(resource)?;
        if resource_type_of(resource) == Some(crate::bundle::BUNDLE_RESOURCE_TYPE) {
            self.tracker.observe_bundle_response(&envelope);
        } else {
            self.tracker.observe_created(&envelope);
        }
        Ok(envelope)
    }

    /// Tracked `update`.
    pub fn update(&mut self, resource: &Value) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.update(resource)?;
        self.tracker.observe_update(&envelope);
        Ok(envelope)
    }

    /// Tracked `update` with `If-Match`.
    pub fn update_if_match(&mut self, resource: &Value, etag: &str) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.update_if_match(resource, etag)?;
        self.tracker.observe_update(&envelope);
        Ok(envelope)
    }

    /// Tracked `delete`. A confirmed delete stops tracking the identity.
    pub fn delete(&mut self, resource_type: &str, id: &str) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.delete(resource_type, id)?;
        self.tracker
            .observe_delete(&ResourceRef::new(resource_type, id), &envelope);
        Ok(envelope)
    }

    /// Tracked conditional create. Only a `201` is tracked.
    pub fn conditional_create(
        &mut self,
        resource_type: &str,
        resource: &Value,
        criteria: &SearchSpec,
    ) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self
            .client
            .conditional_create(resource_type, resource, criteria)?;
        self.tracker.observe_conditional_create(&envelope);
        Ok(envelope)
    }

    /// Tracked conditional update.
    pub fn conditional_update(
        &mut self,
        resource_type: &str,
        criteria: &SearchSpec,
        resource: &Value,
    ) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self
            .client
            .conditional_update(resource_type, criteria, resource)?;
        self.tracker.observe_update(&envelope);
        Ok(envelope)
    }

    /// Conditional delete. The matched identities are unknown, so tracked
    /// entries stay in place and are cleaned up as already gone.
    pub fn conditional_delete(
        &mut self,
        resource_type: &str,
        criteria: &SearchSpec,
    ) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        Ok(self.client.conditional_delete(resource_type, criteria)?)
    }

    /// Tracked `transaction`.
    pub fn transaction(&mut self, bundle: &Value) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.transaction(bundle)?;
        self.tracker.observe_bundle_response(&envelope);
        Ok(envelope)
    }

    /// Tracked `batch`.
    pub fn batch(&mut self, bundle: &Value) -> HarnessResult<ResponseEnvelope> {
        self.ensure_active()?;
        let envelope = self.client.batch(bundle)?;
        self.tracker.observe_bundle_response(&envelope);
        Ok(envelope)
    }

    /// `read` on the underlying client.
    pub fn read(&self, resource_type: &str, id: &str) -> HarnessResult<ResponseEnvelope> {
        Ok(self.client.read(resource_type, id)?)
    }

    /// `vread` on the underlying client.
    pub fn vread(&self, resource_type: &str, id: &str, version_id: &str) -> HarnessResult<ResponseEnvelope> {
        Ok(self.client.vread(resource_type, id, version_id)?)
    }

    /// `search` on the underlying client.
    pub fn search(&self, resource_type: &str, params: &SearchSpec) -> HarnessResult<ResponseEnvelope> {
        Ok(self.client.search(resource_type, params)?)
    }

    /// `history` on the underlying client.
    pub fn history(&self, resource_type: &str, id: Option<&str>) -> HarnessResult<ResponseEnvelope> {
        Ok(self.client.history(resource_type, id)?)
    }

    /// Drains now. Later mutating calls fail with
    /// [`HarnessError::TrackerClosed`].
    pub fn drain(&mut self) -> Result<DrainReport, CleanupError> {
        self.tracker.drain(&self.client)
    }

    /// Ends the scenario, draining every tracked resource.
    pub fn finish(mut self) -> Result<DrainReport, CleanupError> {
        self.drain()
    }
}

impl<T: HttpTransport> Drop for TrackedClient<T> {
    fn drop(&mut self) {
        // Scenario ended without finish(): early return, error, or panic
        if self.tracker.state() == TrackerState::Done {
            return;
        }
        let scenario = self.tracker.scenario_id();
        match self.tracker.drain(&self.client) {
            Ok(report) => info!(
                scenario = %scenario,
                deleted = report.deleted,
                already_gone = report.already_gone,
                "Drained on drop"
            ),
            Err(e) => error!(scenario = %scenario, error = %e, "Cleanup on drop failed"),
        }
    }
}

/// Runs `scenario` against the configured server and drains afterwards on
/// every exit path.
///
/// ```no_run
/// use helios_conformance::{HarnessConfig, run_scenario};
/// use helios_conformance::assertions::assert_created;
/// use serde_json::json;
///
/// let config = HarnessConfig::from_env();
/// run_scenario(&config, |client| {
///     let response = client.create("Patient", &json!({"resourceType": "Patient"}))?;
///     assert_created(&response)?;
///     Ok(())
/// })
/// .unwrap();
/// ```
pub fn run_scenario<R, F>(config: &HarnessConfig, scenario: F) -> HarnessResult<R>
where
    F: FnOnce(&mut TrackedClient) -> HarnessResult<R>,
{
    run_scenario_with(TrackedClient::new(config)?, scenario)
}

/// Like [`run_scenario`], over an already-built client.
///
/// A scenario error and a cleanup error are reported together as
/// [`HarnessError::ScenarioWithCleanup`].
pub fn run_scenario_with<T, R, F>(mut client: TrackedClient<T>, scenario: F) -> HarnessResult<R>
where
    T: HttpTransport,
    F: FnOnce(&mut TrackedClient<T>) -> HarnessResult<R>,
{
    let result = scenario(&mut client);
    let cleanup = client.finish();

    match (result, cleanup) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(cleanup)) => Err(HarnessError::Cleanup(cleanup)),
        (Err(scenario), Ok(_)) => Err(scenario),
        (Err(scenario), Err(cleanup)) => Err(HarnessError::ScenarioWithCleanup {
            scenario: Box::new(scenario),
            cleanup,
        }),
    }
}
