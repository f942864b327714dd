/*!
Resource providers for snapshot rotation.

This module defines the provider abstraction (port) the rotation engine drives,
and the concrete implementations (adapters) for EC2 volumes, RDS database
instances and an in-memory fleet. The engine never talks to a cloud API
directly; every provider-specific step goes through [`ResourceProvider`].
*/

#[cfg(feature = "aws")]
pub mod ec2;
pub mod memory;
#[cfg(feature = "aws")]
pub mod rds;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::Result;

/// Tags attached to a resource or snapshot, ordered by key
pub type Tags = BTreeMap<String, String>;

/// Tag keys starting with this prefix are reserved by AWS and never copied
pub const RESERVED_TAG_PREFIX: &str = "aws:";

/// The kind of backupable resource a provider manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// Block-storage volumes (EC2 EBS)
    Volume,
    /// Managed database instances (RDS)
    Database,
}

impl ResourceKind {
    /// Short label used for log fields, metric labels and response keys
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "ec2",
            ResourceKind::Database => "rds",
        }
    }

    /// Service name used in notification subjects
    pub fn service_name(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "EC2",
            ResourceKind::Database => "RDS",
        }
    }

    /// Noun used in error narratives
    pub fn noun(&self) -> &'static str {
        match self {
            ResourceKind::Volume => "volumes",
            ResourceKind::Database => "RDS",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Provider abstraction for the resources being rotated
///
/// Every operation the rotation engine needs that depends on the kind of
/// resource lives here. Implementations may fail any fallible call with a
/// provider error; the engine decides whether that failure is fatal, counted
/// against the resource, or absorbed.
pub trait ResourceProvider {
    /// Handle to a backupable unit (volume, database instance, ...)
    type Resource;
    /// Handle to a point-in-time copy of a resource
    type Snapshot;

    /// The kind of resource this provider manages
    fn kind(&self) -> ResourceKind;

    /// List resources carrying the tag `tag_key=tag_value`
    fn list_candidates(&self, tag_key: &str, tag_value: &str) -> Result<Vec<Self::Resource>>;

    /// Read the non-reserved tags of a resource
    ///
    /// An empty `resource_id` yields an empty map.
    fn get_tags(&self, resource_id: &str) -> Result<Tags>;

    /// Create a snapshot of `resource` and apply `tags` to it
    ///
    /// # Returns
    /// The identifier of the new snapshot
    fn create_snapshot(
        &self,
        resource: &Self::Resource,
        description: &str,
        tags: &Tags,
    ) -> Result<String>;

    /// List every snapshot of one resource, regardless of period
    fn list_snapshots(&self, resource: &Self::Resource) -> Result<Vec<Self::Snapshot>>;

    /// Delete a snapshot unconditionally
    fn delete_snapshot(&self, snapshot: &Self::Snapshot) -> Result<()>;

    /// Stable identifier of a resource
    fn resolve_id(&self, resource: &Self::Resource) -> String;

    /// Display name of a snapshot, matched against the period prefix
    fn resolve_snapshot_name(&self, snapshot: &Self::Snapshot) -> String;

    /// Creation time of a snapshot, if the provider reported one
    fn snapshot_created_at(&self, snapshot: &Self::Snapshot) -> Option<DateTime<Utc>>;

    /// Creation time of a snapshot, defaulting to `now` when absent
    fn resolve_snapshot_time(&self, snapshot: &Self::Snapshot, now: DateTime<Utc>) -> DateTime<Utc> {
        self.snapshot_created_at(snapshot).unwrap_or(now)
    }

    /// Prefix identifying snapshots owned by the rotation of `period`
    fn period_prefix(&self, period: &str) -> String {
        period.to_string()
    }
}

/// Collect key/value pairs into [`Tags`], dropping reserved keys
pub fn filter_reserved_tags<I, K, V>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .filter(|(key, _)| !key.starts_with(RESERVED_TAG_PREFIX))
        .collect()
}

/// Convert an AWS SDK timestamp into a chrono UTC timestamp
#[cfg(feature = "aws")]
pub(crate) fn to_utc(time: &aws_sdk_ec2::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

// Re-export types for convenience
#[cfg(feature = "aws")]
pub use ec2::Ec2Provider;
pub use memory::{MemoryProvider, MemoryResource, MemorySnapshot};
#[cfg(feature = "aws")]
pub use rds::RdsProvider;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_reserved_tags() {
        let tags = filter_reserved_tags(vec![
            ("Name", "web-data"),
            ("aws:cloudformation:stack-name", "prod"),
            ("MakeSnapshot", "True"),
        ]);

        assert_eq!(tags.len(), 2);
        assert_eq!(tags.get("Name").map(String::as_str), Some("web-data"));
        assert!(!tags.contains_key("aws:cloudformation:stack-name"));
    }

    #[test]
    fn test_reserved_prefix_is_case_sensitive() {
        let tags = filter_reserved_tags(vec![("AWS:Owner", "ops")]);
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_resource_kind_labels() {
        assert_eq!(ResourceKind::Volume.label(), "ec2");
        assert_eq!(ResourceKind::Database.to_string(), "rds");
        assert_eq!(ResourceKind::Database.service_name(), "RDS");
        assert_eq!(ResourceKind::Volume.noun(), "volumes");
    }

    #[cfg(feature = "aws")]
    #[test]
    fn test_to_utc() {
        let time = aws_sdk_ec2::primitives::DateTime::from_secs(1_700_000_000);
        let converted = to_utc(&time).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }
}
