//! The set of resources one scenario has brought into existence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::resource::ResourceRef;

/// Bookkeeping for one tracked identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedMeta {
    /// Monotonic creation order within the set.
    pub sequence: u64,
    /// When the identity was first observed.
    pub created_at: DateTime<Utc>,
    /// Whether drain purges this resource's type after deleting it.
    pub hard_delete: bool,
}

/// Identities believed to still exist on the server.
///
/// Keys compare by `(type, id)`; the stored key carries the latest observed
/// version.
#[derive(Debug, Default)]
pub struct TrackedSet {
    entries: HashMap<ResourceRef, TrackedMeta>,
    next_sequence: u64,
}

impl TrackedSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `resource`. Returns false if the identity was already tracked,
    /// in which case only its version is refreshed and the original
    /// creation order is kept.
    pub fn insert(&mut self, resource: ResourceRef, hard_delete: bool) -> bool {
        if self.refresh(resource.clone()) {
            return false;
        }

        let meta = TrackedMeta {
            sequence: self.next_sequence,
            created_at: Utc::now(),
            hard_delete,
        };
        self.next_sequence += 1;
        self.entries.insert(resource, meta);
        true
    }

    /// Replaces the stored version of an already-tracked identity.
    /// Returns false if the identity is not tracked.
    pub fn refresh(&mut self, resource: ResourceRef) -> bool {
        match self.entries.remove_entry(&resource) {
            Some((old, meta)) => {
                let key = if resource.version_id().is_some() {
                    resource
                } else {
                    old
                };
                self.entries.insert(key, meta);
                true
            }
            None => false,
        }
    }

    /// Stops tracking `resource`, returning the stored key and metadata.
    pub fn remove(&mut self, resource: &ResourceRef) -> Option<(ResourceRef, TrackedMeta)> {
        self.entries.remove_entry(resource)
    }

    /// Returns true if the identity is tracked.
    pub fn contains(&self, resource: &ResourceRef) -> bool {
        self.entries.contains_key(resource)
    }

    /// Returns the stored metadata for an identity.
    pub fn get(&self, resource: &ResourceRef) -> Option<&TrackedMeta> {
        self.entries.get(resource)
    }

    /// Returns the stored key (with its latest version) for an identity.
    pub fn tracked_ref(&self, resource: &ResourceRef) -> Option<&ResourceRef> {
        self.entries.get_key_value(resource).map(|(key, _)| key)
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the tracked identities, most recently created first.
    pub fn drain_order(&self) -> Vec<(ResourceRef, TrackedMeta)> {
        let mut ordered: Vec<_> = self
            .entries
            .iter()
            .map(|(resource, meta)| (resource.clone(), *meta))
            .collect();
        ordered.sort_by(|a, b| b.1.sequence.cmp(&a.1.sequence));
        ordered
    }
}
