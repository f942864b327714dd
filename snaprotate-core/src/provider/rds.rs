/*!
Amazon RDS database instance provider.

RDS has no server-side tag filter for instances, so discovery lists every
instance and reads its tags one by one. Tag lookups need a full ARN, which
in turn needs the owning account id; it is resolved once per provider.
*/

use aws_sdk_rds::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_rds::types::{DbInstance, DbSnapshot, Tag};
use aws_sdk_rds::Client as RdsClient;
use chrono::{DateTime, Local, Utc};
use once_cell::sync::OnceCell;
use tracing::{debug, error, info};

use super::{filter_reserved_tags, to_utc, ResourceKind, ResourceProvider, Tags};
use crate::aws::AwsContext;
use crate::{Result, RotateError};

/// Account id used in ARNs when no security group reveals the real one
pub const UNKNOWN_ACCOUNT: &str = "0";

/// RDS database instance provider
#[derive(Debug)]
pub struct RdsProvider {
    client: RdsClient,
    context: AwsContext,
    region: String,
    period: String,
    date_suffix: String,
    account_id: OnceCell<String>,
}

impl RdsProvider {
    /// Create a provider for `region` from the environment's AWS configuration
    ///
    /// `period` and `date_suffix` feed the snapshot identifier, as RDS
    /// snapshots carry no free-form description.
    pub fn new(region: &str, period: &str, date_suffix: &str) -> Result<Self> {
        let context = AwsContext::load(Some(region))?;
        Ok(Self::with_context(context, period, date_suffix))
    }

    /// Create a provider from an already loaded AWS context
    pub fn with_context(context: AwsContext, period: &str, date_suffix: &str) -> Self {
        let client = RdsClient::new(context.config());
        let region = context.region();
        info!(region = %region, "Initialized RDS database provider");
        Self {
            client,
            context,
            region,
            period: period.to_string(),
            date_suffix: date_suffix.to_string(),
            account_id: OnceCell::new(),
        }
    }

    /// Owning account id, looked up on first use
    pub fn account_id(&self) -> Result<&str> {
        self.account_id
            .get_or_try_init(|| {
                let output = self
                    .context
                    .block_on(self.client.describe_db_security_groups().send())
                    .map_err(|e| map_rds_error("describe_db_security_groups", e, "account"))?;

                let account = output
                    .db_security_groups
                    .unwrap_or_default()
                    .into_iter()
                    .next()
                    .and_then(|group| group.owner_id)
                    .unwrap_or_else(|| UNKNOWN_ACCOUNT.to_string());
                debug!(account_id = %account, "Resolved RDS account id");
                Ok::<_, RotateError>(account)
            })
            .map(String::as_str)
    }

    fn arn_for(&self, instance_id: &str) -> Result<String> {
        Ok(build_arn(&self.region, self.account_id()?, instance_id))
    }

    fn list_tags(&self, instance_id: &str) -> Result<Vec<Tag>> {
        let arn = self.arn_for(instance_id)?;
        let output = self
            .context
            .block_on(self.client.list_tags_for_resource().resource_name(&arn).send())
            .map_err(|e| map_rds_error("list_tags_for_resource", e, &arn))?;
        Ok(output.tag_list.unwrap_or_default())
    }

    fn has_tag(&self, instance_id: &str, tag_key: &str, tag_value: &str) -> Result<bool> {
        Ok(self
            .list_tags(instance_id)?
            .iter()
            .any(|tag| tag.key() == Some(tag_key) && tag.value() == Some(tag_value)))
    }
}

impl ResourceProvider for RdsProvider {
    type Resource = DbInstance;
    type Snapshot = DbSnapshot;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Database
    }

    fn list_candidates(&self, tag_key: &str, tag_value: &str) -> Result<Vec<DbInstance>> {
        info!(
            tag_key = %tag_key,
            tag_value = %tag_value,
            "Finding databases that match the requested tag"
        );

        let mut instances = Vec::new();
        let mut marker = None;
        loop {
            let output = self
                .context
                .block_on(self.client.describe_db_instances().set_marker(marker).send())
                .map_err(|e| map_rds_error("describe_db_instances", e, tag_key))?;

            instances.extend(output.db_instances.unwrap_or_default());
            marker = output.marker;
            if marker.is_none() {
                break;
            }
        }

        let mut found = Vec::new();
        for instance in instances {
            let instance_id = self.resolve_id(&instance);
            if self.has_tag(&instance_id, tag_key, tag_value)? {
                found.push(instance);
            }
        }

        info!(count = found.len(), "Found databases to manage");
        Ok(found)
    }

    fn get_tags(&self, resource_id: &str) -> Result<Tags> {
        if resource_id.is_empty() {
            return Ok(Tags::new());
        }

        Ok(filter_reserved_tags(
            self.list_tags(resource_id)?
                .into_iter()
                .filter_map(|tag| Some((tag.key?, tag.value.unwrap_or_default()))),
        ))
    }

    fn create_snapshot(&self, resource: &DbInstance, _description: &str, tags: &Tags) -> Result<String> {
        let instance_id = self.resolve_id(resource);
        let snapshot_id = snapshot_identifier(&self.period, &instance_id, Local::now(), &self.date_suffix);
        debug!(instance_id = %instance_id, snapshot_id = %snapshot_id, "Starting RDS create_db_snapshot operation");

        let rds_tags: Vec<Tag> = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        self.context
            .block_on(
                self.client
                    .create_db_snapshot()
                    .db_instance_identifier(&instance_id)
                    .db_snapshot_identifier(&snapshot_id)
                    .set_tags(Some(rds_tags))
                    .send(),
            )
            .map_err(|e| {
                let mapped = map_rds_error("create_db_snapshot", e, &instance_id);
                error!(instance_id = %instance_id, error = ?mapped, "Failed to create RDS snapshot");
                mapped
            })?;

        info!(instance_id = %instance_id, snapshot_id = %snapshot_id, "Created RDS snapshot");
        Ok(snapshot_id)
    }

    fn list_snapshots(&self, resource: &DbInstance) -> Result<Vec<DbSnapshot>> {
        let instance_id = self.resolve_id(resource);

        let mut snapshots = Vec::new();
        let mut marker = None;
        loop {
            let output = self
                .context
                .block_on(
                    self.client
                        .describe_db_snapshots()
                        .db_instance_identifier(&instance_id)
                        .snapshot_type("manual")
                        .set_marker(marker)
                        .send(),
                )
                .map_err(|e| map_rds_error("describe_db_snapshots", e, &instance_id))?;

            snapshots.extend(output.db_snapshots.unwrap_or_default());
            marker = output.marker;
            if marker.is_none() {
                break;
            }
        }

        debug!(instance_id = %instance_id, count = snapshots.len(), "Listed RDS snapshots");
        Ok(snapshots)
    }

    fn delete_snapshot(&self, snapshot: &DbSnapshot) -> Result<()> {
        let snapshot_id = snapshot.db_snapshot_identifier().unwrap_or_default();
        info!(snapshot_id = %snapshot_id, "Deleting RDS snapshot");

        self.context
            .block_on(
                self.client
                    .delete_db_snapshot()
                    .db_snapshot_identifier(snapshot_id)
                    .send(),
            )
            .map_err(|e| {
                let mapped = map_rds_error("delete_db_snapshot", e, snapshot_id);
                error!(snapshot_id = %snapshot_id, error = ?mapped, "Failed to delete RDS snapshot");
                mapped
            })?;
        Ok(())
    }

    fn resolve_id(&self, resource: &DbInstance) -> String {
        resource.db_instance_identifier().unwrap_or_default().to_string()
    }

    fn resolve_snapshot_name(&self, snapshot: &DbSnapshot) -> String {
        snapshot.db_snapshot_identifier().unwrap_or_default().to_string()
    }

    fn snapshot_created_at(&self, snapshot: &DbSnapshot) -> Option<DateTime<Utc>> {
        // Snapshots still being created have no creation time yet
        snapshot.snapshot_create_time().and_then(to_utc)
    }
}

/// `arn:aws:rds:<region>:<account>:db:<instance>`
pub fn build_arn(region: &str, account_id: &str, instance_id: &str) -> String {
    format!("arn:aws:rds:{region}:{account_id}:db:{instance_id}")
}

/// Identifier of a new manual snapshot: `{period}-{instance}-{timestamp}-{suffix}`
pub fn snapshot_identifier(
    period: &str,
    instance_id: &str,
    now: DateTime<Local>,
    date_suffix: &str,
) -> String {
    format!(
        "{period}-{instance_id}-{}-{date_suffix}",
        now.format("%d-%m-%Y-%H-%M-%S")
    )
}

/// Map AWS SDK errors to RotateError with appropriate context
fn map_rds_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    op: &str,
    error: SdkError<E>,
    target: &str,
) -> RotateError {
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            RotateError::provider(format!("RDS {op} request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => {
            RotateError::provider(format!("RDS {op} request timed out ({target})"))
        }
        SdkError::ResponseError(response_err) => {
            RotateError::provider(format!("RDS {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("AccessDenied") => RotateError::provider(format!(
                "Access denied to RDS {op} (check credentials and permissions)"
            )),
            Some("DBInstanceNotFound") => {
                RotateError::provider(format!("RDS instance '{target}' not found"))
            }
            Some("DBSnapshotNotFound") => {
                RotateError::provider(format!("RDS snapshot '{target}' not found"))
            }
            Some("SnapshotQuotaExceeded") => {
                RotateError::provider(format!("RDS snapshot quota exceeded ({target})"))
            }
            Some(code) => RotateError::provider(format!(
                "RDS {op} service error ({code}): {}",
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => RotateError::provider(format!("RDS {op} service error: {service_err:?}")),
        },
        _ => RotateError::provider(format!("RDS {op} error: {error}")),
    }
}
