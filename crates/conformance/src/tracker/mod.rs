//! Resource lifecycle tracking.
//!
//! A [`ResourceTracker`] records every resource a scenario brings into
//! existence and deletes them all again when the scenario ends, whether it
//! passed, failed an assertion, or hit a transport error.
//!
//! ```text
//! Active ──drain()──▶ Draining ──▶ Done
//! ```
//!
//! Drain walks the tracked set in reverse creation order so referrers go
//! before the resources they reference. A `404`/`410` on delete counts as
//! already clean. Resource types marked for hard delete are purged once each
//! after every soft delete has been issued. Individual failures never stop
//! the sweep; they are returned together in a [`CleanupError`].
//!
//! Most scenarios use [`TrackedClient`] or [`run_scenario`] rather than a
//! bare tracker.

mod scenario;
mod set;

pub use scenario::{TrackedClient, run_scenario, run_scenario_with};
pub use set::{TrackedMeta, TrackedSet};

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::assertions::outcome::{OPERATION_OUTCOME, OperationOutcome};
use crate::bundle::{self, entry_outcomes};
use crate::client::{FhirClient, HttpTransport, ResponseEnvelope};
use crate::config::HarnessConfig;
use crate::error::{CleanupError, CleanupFailure};
use crate::resource::{ResourceRef, resource_type_of};

/// Lifecycle state of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Accepting new tracked resources.
    Active,
    /// Teardown in progress.
    Draining,
    /// Teardown finished. Terminal.
    Done,
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TrackerState::Active => "active",
            TrackerState::Draining => "draining",
            TrackerState::Done => "done",
        })
    }
}

/// What one drain cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Resources deleted by this drain.
    pub deleted: usize,
    /// Resources the server reported as already gone (`404`/`410`).
    pub already_gone: usize,
    /// Resource types purged, in the order they were purged.
    pub purged: Vec<String>,
}

/// Tracks the resources of one scenario.
#[derive(Debug)]
pub struct ResourceTracker {
    scenario_id: Uuid,
    state: TrackerState,
    tracked: TrackedSet,
    hard_delete: bool,
    hard_delete_overrides: HashMap<String, bool>,
    purge_key: String,
    purge_types: Vec<String>,
}

impl ResourceTracker {
    /// Creates a tracker. With `hard_delete` set, every tracked type is
    /// purged with `purge_key` after its resources are deleted.
    pub fn new(purge_key: impl Into<String>, hard_delete: bool) -> Self {
        Self {
            scenario_id: Uuid::new_v4(),
            state: TrackerState::Active,
            tracked: TrackedSet::new(),
            hard_delete,
            hard_delete_overrides: HashMap::new(),
            purge_key: purge_key.into(),
            purge_types: Vec::new(),
        }
    }

    /// Creates a tracker using the configured purge key and purge policy.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(config.purge_key.clone(), config.purge_on_cleanup)
    }

    /// Overrides the hard-delete policy for one resource type.
    pub fn with_hard_delete(mut self, resource_type: impl Into<String>, hard_delete: bool) -> Self {
        self.hard_delete_overrides
            .insert(resource_type.into(), hard_delete);
        self
    }

    /// Id carried in every log record of this tracker.
    pub fn scenario_id(&self) -> Uuid {
        self.scenario_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TrackerState {
        self.state
    }

    /// The tracked identities.
    pub fn tracked(&self) -> &TrackedSet {
        &self.tracked
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Returns true if the identity is tracked.
    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.tracked.contains(resource)
    }

    /// Types that will be purged at the end of the drain.
    pub fn pending_purges(&self) -> &[String] {
        &self.purge_types
    }

    fn hard_delete_for(&self, resource_type: &str) -> bool {
        self.hard_delete_overrides
            .get(resource_type)
            .copied()
            .unwrap_or(self.hard_delete)
    }

    /// Tracks an identity created outside the tracked client.
    pub fn track(&mut self, resource: ResourceRef) -> bool {
        let hard_delete = self.hard_delete_for(resource.resource_type());
        let inserted = self.tracked.insert(resource.clone(), hard_delete);
        if let Some(meta) = self.tracked.get(&resource) {
            debug!(
                scenario = %self.scenario_id,
                resource = %resource,
                hard_delete = meta.hard_delete,
                sequence = meta.sequence,
                tracked_at = %meta.created_at,
                inserted,
                "Tracking resource"
            );
        }
        inserted
    }

    /// Observes a plain create. Any 2xx with an identifiable resource is tracked.
    pub fn observe_created(&mut self, envelope: &ResponseEnvelope) -> Option<ResourceRef> {
        if !envelope.is_success() {
            return None;
        }
        self.track_identity(envelope)
    }

    /// Observes a conditional create. Only `201` is tracked; a `200` means
    /// the server matched an existing resource the scenario does not own.
    pub fn observe_conditional_create(
        &mut self,
        envelope: &ResponseEnvelope,
    ) -> Option<ResourceRef> {
        if envelope.status() != 201 {
            debug!(
                scenario = %self.scenario_id,
                status = envelope.status(),
                "Conditional create did not create a resource"
            );
            return None;
        }
        self.track_identity(envelope)
    }

    /// Observes an update. A `201` (update-as-create) is tracked; any other
    /// 2xx refreshes the version of an already-tracked identity.
    pub fn observe_update(&mut self, envelope: &ResponseEnvelope) -> Option<ResourceRef> {
        if envelope.status() == 201 {
            return self.track_identity(envelope);
        }
        if envelope.is_success() {
            if let Some(resource) = identify(envelope) {
                self.tracked.refresh(resource.clone());
                return Some(resource);
            }
        }
        None
    }

    /// Observes a delete issued by the scenario. A 2xx or `404`/`410` stops
    /// tracking the identity; its type is still purged at drain time when
    /// hard delete applies.
    pub fn observe_delete(&mut self, target: &ResourceRef, envelope: &ResponseEnvelope) -> bool {
        let status = envelope.status();
        if envelope.is_success() || status == 404 || status == 410 {
            if let Some((resource, meta)) = self.tracked.remove(target) {
                debug!(scenario = %self.scenario_id, resource = %resource, status, "Resource deleted by scenario");
                if meta.hard_delete {
                    self.schedule_purge(resource.resource_type());
                }
                return true;
            }
        }
        false
    }

    /// Observes a batch or transaction response. Every entry reporting
    /// `201` is tracked on its own; other 2xx entries refresh the version of
    /// identities already tracked.
    pub fn observe_bundle_response(&mut self, envelope: &ResponseEnvelope) -> Vec<ResourceRef> {
        let Some(body) = envelope.body() else {
            return Vec::new();
        };
        if !envelope.is_success() || !bundle::is_bundle(body) {
            return Vec::new();
        }

        let mut created = Vec::new();
        for outcome in entry_outcomes(body) {
            let Some(resource) = outcome.resource_ref() else {
                continue;
            };
            if outcome.is_created() {
                if self.track(resource.clone()) {
                    created.push(resource);
                }
            } else if outcome.status.is_some_and(|s| (200..300).contains(&s)) {
                self.tracked.refresh(resource);
            }
        }

        info!(
            scenario = %self.scenario_id,
            created = created.len(),
            "Tracked resources from bundle response"
        );
        created
    }

    fn track_identity(&mut self, envelope: &ResponseEnvelope) -> Option<ResourceRef> {
        match identify(envelope) {
            Some(resource) => {
                self.track(resource.clone());
                Some(resource)
            }
            None => {
                warn!(
                    scenario = %self.scenario_id,
                    status = envelope.status(),
                    "Successful response carries no resource identity; nothing tracked"
                );
                None
            }
        }
    }

    fn schedule_purge(&mut self, resource_type: &str) {
        if !self.purge_types.iter().any(|t| t == resource_type) {
            self.purge_types.push(resource_type.to_string());
        }
    }

    /// Deletes every tracked resource, then purges hard-delete types.
    ///
    /// Calling this again after it finished is a no-op returning an empty
    /// report.
    pub fn drain<T: HttpTransport>(
        &mut self,
        client: &FhirClient<T>,
    ) -> Result<DrainReport, CleanupError> {
        if self.state == TrackerState::Done {
            debug!(scenario = %self.scenario_id, "Tracker already drained");
            return Ok(DrainReport::default());
        }

        self.state = TrackerState::Draining;
        info!(
            scenario = %self.scenario_id,
            tracked = self.tracked.len(),
            "Draining tracked resources"
        );

        let mut report = DrainReport::default();
        let mut failures = Vec::new();

        for (resource, meta) in self.tracked.drain_order() {
            match client.delete(resource.resource_type(), resource.id()) {
                Ok(envelope) if envelope.is_success() => {
                    debug!(scenario = %self.scenario_id, resource = %resource, tracked_at = %meta.created_at, status = envelope.status(), "Deleted");
                    report.deleted += 1;
                    self.forget(&resource, meta.hard_delete);
                }
                Ok(envelope) if matches!(envelope.status(), 404 | 410) => {
                    debug!(scenario = %self.scenario_id, resource = %resource, tracked_at = %meta.created_at, status = envelope.status(), "Already gone");
                    report.already_gone += 1;
                    self.forget(&resource, meta.hard_delete);
                }
                Ok(envelope) => {
                    warn!(scenario = %self.scenario_id, resource = %resource, tracked_at = %meta.created_at, status = envelope.status(), "Delete rejected");
                    failures.push(CleanupFailure::DeleteRejected {
                        target: resource,
                        status: envelope.status(),
                        diagnostics: diagnostics_of(envelope.body()),
                    });
                }
                Err(source) => {
                    warn!(scenario = %self.scenario_id, resource = %resource, tracked_at = %meta.created_at, error = %source, "Delete failed");
                    failures.push(CleanupFailure::DeleteTransport {
                        target: resource,
                        source,
                    });
                }
            }
        }

        for resource_type in std::mem::take(&mut self.purge_types) {
            match client.purge(&resource_type, &self.purge_key) {
                Ok(envelope) if envelope.is_success() => {
                    debug!(scenario = %self.scenario_id, resource_type = %resource_type, "Purged");
                    report.purged.push(resource_type);
                }
                Ok(envelope) if envelope.status() == 404 => {
                    debug!(scenario = %self.scenario_id, resource_type = %resource_type, "Nothing to purge");
                }
                Ok(envelope) => {
                    warn!(scenario = %self.scenario_id, resource_type = %resource_type, status = envelope.status(), "Purge rejected");
                    failures.push(CleanupFailure::PurgeRejected {
                        resource_type,
                        status: envelope.status(),
                    });
                }
                Err(source) => {
                    warn!(scenario = %self.scenario_id, resource_type = %resource_type, error = %source, "Purge failed");
                    failures.push(CleanupFailure::PurgeTransport {
                        resource_type,
                        source,
                    });
                }
            }
        }

        self.state = TrackerState::Done;
        info!(
            scenario = %self.scenario_id,
            deleted = report.deleted,
            already_gone = report.already_gone,
            purged = report.purged.len(),
            failures = failures.len(),
            "Drain finished"
        );

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(CleanupError { failures, report })
        }
    }

    fn forget(&mut self, resource: &ResourceRef, hard_delete: bool) {
        self.tracked.remove(resource);
        if hard_delete {
            self.schedule_purge(resource.resource_type());
        }
    }
}

/// Takes the identity from the body, falling back to the `Location` header.
fn identify(envelope: &ResponseEnvelope) -> Option<ResourceRef> {
    let from_location = envelope.location().and_then(ResourceRef::from_location);
    let from_body = envelope
        .body()
        .filter(|body| resource_type_of(body) != Some(OPERATION_OUTCOME))
        .and_then(ResourceRef::from_resource);

    match (from_body, from_location) {
        (Some(body), Some(location)) if body.version_id().is_none() && body == location => {
            Some(location)
        }
        (Some(body), _) => Some(body),
        (None, location) => location,
    }
}

fn diagnostics_of(body: Option<&Value>) -> Option<String> {
    body.and_then(OperationOutcome::from_value)
        .and_then(|outcome| outcome.first_diagnostic())
}
