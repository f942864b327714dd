/*!
In-memory resource provider.

Holds a fleet of resources and snapshots behind a mutex. Used by the test
suites to drive the rotation engine without touching a cloud API, including
fault injection for every failure class the engine distinguishes.
*/

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{filter_reserved_tags, ResourceKind, ResourceProvider, Tags};
use crate::{Result, RotateError};

/// A resource held by [`MemoryProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryResource {
    pub id: String,
    pub tags: Tags,
}

impl MemoryResource {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            tags: Tags::new(),
        }
    }

    pub fn with_tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A snapshot held by [`MemoryProvider`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySnapshot {
    pub id: String,
    pub resource_id: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub tags: Tags,
}

#[derive(Debug, Default)]
struct MemoryState {
    resources: Vec<MemoryResource>,
    snapshots: Vec<MemorySnapshot>,
    next_snapshot: u64,
    fail_discovery: bool,
    failing_creates: HashSet<String>,
    failing_listings: HashSet<String>,
    failing_tag_reads: HashSet<String>,
    failing_deletes: HashSet<String>,
}

/// In-memory provider
///
/// Snapshot names are the creation description, and the period prefix is the
/// period label followed by a configurable suffix (`_snapshot` by default,
/// mirroring the EC2 provider). Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryProvider {
    kind: ResourceKind,
    prefix_suffix: String,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            kind: ResourceKind::Volume,
            prefix_suffix: "_snapshot".to_string(),
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Report a different resource kind
    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Change the suffix appended to the period label to form the prefix
    pub fn with_prefix_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.prefix_suffix = suffix.into();
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panic while holding the lock leaves the fleet consistent enough for tests
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_resource(&self, resource: MemoryResource) {
        self.state().resources.push(resource);
    }

    /// Seed an existing snapshot of `resource_id`
    pub fn add_snapshot<S: Into<String>>(
        &self,
        resource_id: &str,
        name: S,
        created_at: Option<DateTime<Utc>>,
    ) -> String {
        let mut state = self.state();
        state.next_snapshot += 1;
        let id = format!("snap-{:08}", state.next_snapshot);
        state.snapshots.push(MemorySnapshot {
            id: id.clone(),
            resource_id: resource_id.to_string(),
            name: name.into(),
            created_at,
            tags: Tags::new(),
        });
        id
    }

    /// All snapshots of a resource, in insertion order
    pub fn snapshots_of(&self, resource_id: &str) -> Vec<MemorySnapshot> {
        self.state()
            .snapshots
            .iter()
            .filter(|snapshot| snapshot.resource_id == resource_id)
            .cloned()
            .collect()
    }

    pub fn fail_discovery(&self) {
        self.state().fail_discovery = true;
    }

    pub fn fail_create_for(&self, resource_id: &str) {
        self.state().failing_creates.insert(resource_id.to_string());
    }

    pub fn fail_listing_for(&self, resource_id: &str) {
        self.state().failing_listings.insert(resource_id.to_string());
    }

    pub fn fail_tag_read_for(&self, resource_id: &str) {
        self.state().failing_tag_reads.insert(resource_id.to_string());
    }

    pub fn fail_delete_of(&self, snapshot_id: &str) {
        self.state().failing_deletes.insert(snapshot_id.to_string());
    }
}

impl ResourceProvider for MemoryProvider {
    type Resource = MemoryResource;
    type Snapshot = MemorySnapshot;

    fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn list_candidates(&self, tag_key: &str, tag_value: &str) -> Result<Vec<MemoryResource>> {
        let state = self.state();
        if state.fail_discovery {
            return Err(RotateError::provider("memory fleet unavailable"));
        }
        Ok(state
            .resources
            .iter()
            .filter(|resource| resource.tags.get(tag_key).map(String::as_str) == Some(tag_value))
            .cloned()
            .collect())
    }

    fn get_tags(&self, resource_id: &str) -> Result<Tags> {
        let state = self.state();
        if state.failing_tag_reads.contains(resource_id) {
            return Err(RotateError::provider(format!(
                "cannot read tags of {resource_id}"
            )));
        }
        Ok(state
            .resources
            .iter()
            .find(|resource| resource.id == resource_id)
            .map(|resource| filter_reserved_tags(resource.tags.clone()))
            .unwrap_or_default())
    }

    fn create_snapshot(
        &self,
        resource: &MemoryResource,
        description: &str,
        tags: &Tags,
    ) -> Result<String> {
        let mut state = self.state();
        if state.failing_creates.contains(&resource.id) {
            return Err(RotateError::provider(format!(
                "snapshot quota exceeded for {}",
                resource.id
            )));
        }
        state.next_snapshot += 1;
        let id = format!("snap-{:08}", state.next_snapshot);
        state.snapshots.push(MemorySnapshot {
            id: id.clone(),
            resource_id: resource.id.clone(),
            name: description.to_string(),
            created_at: Some(Utc::now()),
            tags: tags.clone(),
        });
        Ok(id)
    }

    fn list_snapshots(&self, resource: &MemoryResource) -> Result<Vec<MemorySnapshot>> {
        if self.state().failing_listings.contains(&resource.id) {
            return Err(RotateError::provider(format!(
                "cannot list snapshots of {}",
                resource.id
            )));
        }
        Ok(self.snapshots_of(&resource.id))
    }

    fn delete_snapshot(&self, snapshot: &MemorySnapshot) -> Result<()> {
        let mut state = self.state();
        if state.failing_deletes.contains(&snapshot.id) {
            return Err(RotateError::provider(format!(
                "snapshot {} is in use",
                snapshot.id
            )));
        }
        state.snapshots.retain(|existing| existing.id != snapshot.id);
        Ok(())
    }

    fn resolve_id(&self, resource: &MemoryResource) -> String {
        resource.id.clone()
    }

    fn resolve_snapshot_name(&self, snapshot: &MemorySnapshot) -> String {
        snapshot.name.clone()
    }

    fn snapshot_created_at(&self, snapshot: &MemorySnapshot) -> Option<DateTime<Utc>> {
        snapshot.created_at
    }

    fn period_prefix(&self, period: &str) -> String {
        format!("{period}{}", self.prefix_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet() -> MemoryProvider {
        let provider = MemoryProvider::new();
        provider.add_resource(
            MemoryResource::new("vol-1")
                .with_tag("MakeSnapshot", "True")
                .with_tag("aws:createdBy", "console"),
        );
        provider.add_resource(MemoryResource::new("vol-2").with_tag("Name", "Anotherone"));
        provider
    }

    #[test]
    fn test_list_candidates_matches_exact_tag() {
        let provider = fleet();
        let found = provider.list_candidates("MakeSnapshot", "True").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "vol-1");

        assert!(provider.list_candidates("MakeSnapshot", "true").unwrap().is_empty());
    }

    #[test]
    fn test_get_tags_drops_reserved() {
        let provider = fleet();
        let tags = provider.get_tags("vol-1").unwrap();
        assert_eq!(tags.len(), 1);
        assert!(provider.get_tags("").unwrap().is_empty());
    }

    #[test]
    fn test_create_list_delete() {
        let provider = fleet();
        let resource = MemoryResource::new("vol-1");
        let mut tags = Tags::new();
        tags.insert("Team".to_string(), "ops".to_string());

        let id = provider.create_snapshot(&resource, "day_snapshot vol-1", &tags).unwrap();
        let listed = provider.list_snapshots(&resource).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].tags, tags);

        provider.delete_snapshot(&listed[0]).unwrap();
        assert!(provider.list_snapshots(&resource).unwrap().is_empty());
    }

    #[test]
    fn test_fault_injection() {
        let provider = fleet();
        let resource = MemoryResource::new("vol-1");

        provider.fail_create_for("vol-1");
        provider.fail_listing_for("vol-1");
        provider.fail_tag_read_for("vol-1");
        assert!(provider.create_snapshot(&resource, "x", &Tags::new()).is_err());
        assert!(provider.list_snapshots(&resource).is_err());
        assert!(provider.get_tags("vol-1").is_err());

        provider.fail_discovery();
        assert!(provider.list_candidates("MakeSnapshot", "True").is_err());
    }

    #[test]
    fn test_period_prefix() {
        assert_eq!(MemoryProvider::new().period_prefix("day"), "day_snapshot");
        assert_eq!(
            MemoryProvider::new().with_prefix_suffix("").period_prefix("week"),
            "week"
        );
    }

    #[test]
    fn test_missing_time_defaults_to_now() {
        let provider = fleet();
        provider.add_snapshot("vol-1", "day_snapshot old", None);
        let snapshot = &provider.snapshots_of("vol-1")[0];

        let now = Utc::now();
        assert_eq!(provider.resolve_snapshot_time(snapshot, now), now);
    }
}
