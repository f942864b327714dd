/*!
Rotation engine that drives one snapshot rotation pass.

This module contains the core business logic: discovering tagged resources,
snapshotting each one, and pruning the snapshots owned by the current period
down to the retention count. Everything provider-specific goes through the
[`ResourceProvider`] port.
*/

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::ops::AddAssign;
use tracing::{debug, error, info, warn};

use crate::config::RotationConfig;
use crate::provider::{ResourceKind, ResourceProvider};
use crate::Result;

/// Timestamp format used in the narrative report
pub const REPORT_TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

const SEPARATOR: &str = "    ---------------------------";

/// Numeric summary of a rotation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationSummary {
    pub total_resources: usize,
    pub total_creates: usize,
    pub total_deletes: usize,
    pub total_errors: usize,
}

impl AddAssign for RotationSummary {
    fn add_assign(&mut self, other: Self) {
        self.total_resources += other.total_resources;
        self.total_creates += other.total_creates;
        self.total_deletes += other.total_deletes;
        self.total_errors += other.total_errors;
    }
}

/// Outcome of a rotation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationResult {
    pub resources_examined: usize,
    pub snapshots_created: usize,
    pub snapshots_deleted: usize,
    /// Resources whose tag read or retention step failed
    pub errors: usize,
    /// Narrative of everything that happened, in order
    pub report: String,
    /// One line per failed resource; empty when the pass ran cleanly
    pub error_report: String,
}

impl RotationResult {
    pub fn summary(&self) -> RotationSummary {
        RotationSummary {
            total_resources: self.resources_examined,
            total_creates: self.snapshots_created,
            total_deletes: self.snapshots_deleted,
            total_errors: self.errors,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.error_report.is_empty()
    }

    fn line(&mut self, line: impl AsRef<str>) {
        self.report.push_str(line.as_ref());
        self.report.push('\n');
    }
}

/// Engine for one rotation pass over one resource provider
///
/// # Example
/// ```rust
/// use snaprotate_core::{MemoryProvider, MemoryResource, RotationConfig, RotationEngine};
///
/// let provider = MemoryProvider::new();
/// provider.add_resource(MemoryResource::new("vol-1").with_tag("MakeSnapshot", "True"));
///
/// let config = RotationConfig::new("day", "MakeSnapshot", "True", "Sat14", 2);
/// let result = RotationEngine::new(provider, config).run()?;
///
/// assert_eq!(result.snapshots_created, 1);
/// assert_eq!(result.snapshots_deleted, 0);
/// # Ok::<(), snaprotate_core::RotateError>(())
/// ```
pub struct RotationEngine<P>
where
    P: ResourceProvider,
{
    provider: P,
    config: RotationConfig,
}

impl<P> RotationEngine<P>
where
    P: ResourceProvider,
{
    pub fn new(provider: P, config: RotationConfig) -> Self {
        Self { provider, config }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &RotationConfig {
        &self.config
    }

    /// Run a single rotation pass
    ///
    /// This method:
    /// 1. Lists the candidate resources carrying the configured tag
    /// 2. For each resource, snapshots it (best effort)
    /// 3. Lists its snapshots, keeps those owned by the period, and deletes
    ///    the oldest beyond the retention count
    /// 4. Summarises the pass in the report
    ///
    /// # Errors
    /// Only a failure to list candidates aborts the pass. Failures on a single
    /// resource are recorded in the result and the pass moves on.
    pub fn run(&self) -> Result<RotationResult> {
        let kind = self.provider.kind();
        let mut result = RotationResult::default();

        let started = format!(
            "Started taking {} snapshots at {}",
            self.config.period,
            Local::now().format(REPORT_TIME_FORMAT)
        );
        info!(kind = %kind, period = %self.config.period, "{started}");
        result.line(started);
        result.line("");

        let candidates = self
            .provider
            .list_candidates(&self.config.tag_key, &self.config.tag_value)
            .map_err(|e| {
                error!(kind = %kind, error = %e, "Failed to list candidate resources");
                e
            })?;

        let prefix = self.provider.period_prefix(&self.config.period);
        let mut succeeded = 0usize;

        for resource in &candidates {
            result.resources_examined += 1;
            let resource_id = self.provider.resolve_id(resource);
            result.line(format!("Processing backup item {resource_id}"));

            match self.rotate_resource(resource, &resource_id, &prefix, &mut result) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    error!(
                        kind = %kind,
                        resource_id = %resource_id,
                        error = %e,
                        "Error in processing resource"
                    );
                    let _ = writeln!(
                        result.error_report,
                        "Error in processing {} with id: {}",
                        kind.noun(),
                        resource_id
                    );
                    result.errors += 1;
                }
            }
        }

        result.line("");
        result.line(format!(
            "Finished making snapshots at {} with {} snapshots of {} possible.",
            Local::now().format(REPORT_TIME_FORMAT),
            succeeded,
            result.resources_examined
        ));
        result.line("");
        result.line(format!("Total snapshots created: {}", result.snapshots_created));
        result.line(format!("Total snapshots errors: {}", result.errors));
        result.line(format!("Total snapshots deleted: {}", result.snapshots_deleted));

        info!(
            kind = %kind,
            resources = result.resources_examined,
            created = result.snapshots_created,
            deleted = result.snapshots_deleted,
            errors = result.errors,
            "Finished rotation pass"
        );
        record_metrics(kind, &result);

        Ok(result)
    }

    /// Create then retain for one resource
    ///
    /// Errors returned from here count against the resource; creation
    /// failures never do.
    fn rotate_resource(
        &self,
        resource: &P::Resource,
        resource_id: &str,
        prefix: &str,
        result: &mut RotationResult,
    ) -> Result<()> {
        let tags = self.provider.get_tags(resource_id)?;
        let description = format!(
            "{period}_snapshot {resource_id}_{period}_{suffix} by snapshot script at {now}",
            period = self.config.period,
            suffix = self.config.date_suffix,
            now = Local::now().format(REPORT_TIME_FORMAT),
        );

        match self.provider.create_snapshot(resource, &description, &tags) {
            Ok(snapshot_id) => {
                debug!(resource_id = %resource_id, snapshot_id = %snapshot_id, "Snapshot created");
                result.snapshots_created += 1;
                result.line(format!(
                    "    New Snapshot created with description: {description} and tags: {tags:?}"
                ));
            }
            Err(e) => {
                warn!(resource_id = %resource_id, error = %e, "Unexpected error creating snapshot");
                result.line(format!("    Failed to create snapshot: {e}"));
            }
        }

        self.retain(resource, prefix, result)
    }

    /// Delete the oldest owned snapshots beyond the retention count
    fn retain(&self, resource: &P::Resource, prefix: &str, result: &mut RotationResult) -> Result<()> {
        let now = Utc::now();
        let created_at = |snapshot: &P::Snapshot| self.provider.resolve_snapshot_time(snapshot, now);

        let mut snapshots = self.provider.list_snapshots(resource)?;
        snapshots.sort_by_key(created_at);

        let mut owned = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            let name = self.provider.resolve_snapshot_name(&snapshot);
            if name.starts_with(prefix) {
                owned.push(snapshot);
            } else {
                info!("Skipping other backup schedule: {name}");
            }
        }

        result.line("");
        result.line(format!(
            "    Current backups in rotation (keeping {})",
            self.config.keep_count
        ));
        result.line(SEPARATOR);
        for snapshot in &owned {
            result.line(format!(
                "    {} - {}",
                self.provider.resolve_snapshot_name(snapshot),
                created_at(snapshot)
            ));
        }
        result.line(SEPARATOR);

        owned.sort_by_key(created_at);
        let excess = owned.len().saturating_sub(self.config.keep_count);

        for snapshot in owned.iter().take(excess) {
            let name = self.provider.resolve_snapshot_name(snapshot);
            result.line(format!("    Deleting snapshot {name}"));
            self.provider.delete_snapshot(snapshot)?;
            result.snapshots_deleted += 1;
        }

        Ok(())
    }
}

/// Owned snapshots that a pass would delete, oldest first
///
/// `snapshots` are `(name, created_at)` pairs in listing order. Useful for
/// previewing a rotation without a provider.
pub fn select_expired<'a>(
    snapshots: &'a [(String, DateTime<Utc>)],
    prefix: &str,
    keep_count: usize,
) -> Vec<&'a (String, DateTime<Utc>)> {
    let mut owned: Vec<_> = snapshots
        .iter()
        .filter(|(name, _)| name.starts_with(prefix))
        .collect();
    owned.sort_by_key(|(_, created_at)| *created_at);
    let excess = owned.len().saturating_sub(keep_count);
    owned.truncate(excess);
    owned
}

#[cfg(feature = "metrics")]
fn record_metrics(kind: ResourceKind, result: &RotationResult) {
    match crate::observability::RotationMetrics::global() {
        Ok(metrics) => metrics.record_pass(kind, result),
        Err(e) => warn!(error = %e, "Rotation metrics unavailable"),
    }
}

#[cfg(not(feature = "metrics"))]
fn record_metrics(_kind: ResourceKind, _result: &RotationResult) {}
