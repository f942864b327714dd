/*!
Amazon EC2 volume provider.

Rotates EBS volume snapshots using the official AWS SDK. Volumes are selected
with a server-side tag filter; snapshots are named by their description.
*/

use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_ec2::types::{Filter, Snapshot, Tag, Volume};
use aws_sdk_ec2::Client as Ec2Client;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::{filter_reserved_tags, to_utc, ResourceKind, ResourceProvider, Tags};
use crate::aws::AwsContext;
use crate::{Result, RotateError};

/// Literal appended to the period label to recognise owned snapshots
pub const SNAPSHOT_PREFIX_SUFFIX: &str = "_snapshot";

/// EC2 volume provider
///
/// # Authentication
/// Uses the standard AWS credential provider chain:
/// 1. Environment variables (AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, AWS_SESSION_TOKEN)
/// 2. AWS credentials file (~/.aws/credentials)
/// 3. IAM roles for EC2 instances, ECS tasks and Lambda functions
///
/// # Example
/// ```rust,no_run
/// use snaprotate_core::{Ec2Provider, RotationConfig, RotationEngine};
///
/// let provider = Ec2Provider::new("ap-southeast-2")?;
/// let config = RotationConfig::new("day", "MakeSnapshot", "True", "Sat14", 12);
/// let result = RotationEngine::new(provider, config).run()?;
/// println!("{}", result.report);
/// # Ok::<(), snaprotate_core::RotateError>(())
/// ```
#[derive(Debug)]
pub struct Ec2Provider {
    client: Ec2Client,
    context: AwsContext,
}

impl Ec2Provider {
    /// Create a provider for `region` from the environment's AWS configuration
    pub fn new(region: &str) -> Result<Self> {
        let context = AwsContext::load(Some(region))?;
        Ok(Self::with_context(context))
    }

    /// Create a provider from an already loaded AWS context
    pub fn with_context(context: AwsContext) -> Self {
        let client = Ec2Client::new(context.config());
        info!(region = %context.region(), "Initialized EC2 volume provider");
        Self { client, context }
    }

    fn apply_tags(&self, snapshot_id: &str, tags: &Tags) -> Result<()> {
        if tags.is_empty() {
            return Ok(());
        }

        for (key, value) in tags {
            debug!(snapshot_id = %snapshot_id, key = %key, value = %value, "Tagging snapshot");
        }
        let ec2_tags: Vec<Tag> = tags
            .iter()
            .map(|(key, value)| Tag::builder().key(key).value(value).build())
            .collect();

        self.context
            .block_on(
                self.client
                    .create_tags()
                    .resources(snapshot_id)
                    .set_tags(Some(ec2_tags))
                    .send(),
            )
            .map_err(|e| map_ec2_error("create_tags", e, snapshot_id))?;
        Ok(())
    }
}

impl ResourceProvider for Ec2Provider {
    type Resource = Volume;
    type Snapshot = Snapshot;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    fn list_candidates(&self, tag_key: &str, tag_value: &str) -> Result<Vec<Volume>> {
        info!(
            tag_key = %tag_key,
            tag_value = %tag_value,
            "Finding volumes that match the requested tag"
        );

        let filter = Filter::builder()
            .name(format!("tag:{tag_key}"))
            .values(tag_value)
            .build();

        let mut volumes = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .context
                .block_on(
                    self.client
                        .describe_volumes()
                        .filters(filter.clone())
                        .set_next_token(next_token)
                        .send(),
                )
                .map_err(|e| map_ec2_error("describe_volumes", e, tag_key))?;

            volumes.extend(output.volumes.unwrap_or_default());
            next_token = output.next_token;
            if next_token.is_none() {
                break;
            }
        }

        info!(count = volumes.len(), "Found volumes to manage");
        Ok(volumes)
    }

    fn get_tags(&self, resource_id: &str) -> Result<Tags> {
        if resource_id.is_empty() {
            return Ok(Tags::new());
        }

        let filter = Filter::builder()
            .name("resource-id")
            .values(resource_id)
            .build();
        let output = self
            .context
            .block_on(self.client.describe_tags().filters(filter).send())
            .map_err(|e| map_ec2_error("describe_tags", e, resource_id))?;

        Ok(filter_reserved_tags(
            output
                .tags
                .unwrap_or_default()
                .into_iter()
                .filter_map(|tag| Some((tag.key?, tag.value.unwrap_or_default()))),
        ))
    }

    fn create_snapshot(&self, resource: &Volume, description: &str, tags: &Tags) -> Result<String> {
        let volume_id = self.resolve_id(resource);
        debug!(volume_id = %volume_id, description = %description, "Starting EC2 create_snapshot operation");

        let output = self
            .context
            .block_on(
                self.client
                    .create_snapshot()
                    .volume_id(&volume_id)
                    .description(description)
                    .send(),
            )
            .map_err(|e| {
                let mapped = map_ec2_error("create_snapshot", e, &volume_id);
                error!(volume_id = %volume_id, error = ?mapped, "Failed to create EC2 snapshot");
                mapped
            })?;

        let snapshot_id = output.snapshot_id.ok_or_else(|| {
            RotateError::provider(format!(
                "EC2 create_snapshot returned no snapshot id for {volume_id}"
            ))
        })?;

        self.apply_tags(&snapshot_id, tags)?;
        info!(volume_id = %volume_id, snapshot_id = %snapshot_id, "Created EC2 snapshot");
        Ok(snapshot_id)
    }

    fn list_snapshots(&self, resource: &Volume) -> Result<Vec<Snapshot>> {
        let volume_id = self.resolve_id(resource);
        let filter = Filter::builder()
            .name("volume-id")
            .values(&volume_id)
            .build();

        let mut snapshots = Vec::new();
        let mut next_token = None;
        loop {
            let output = self
                .context
                .block_on(
                    self.client
                        .describe_snapshots()
                        .filters(filter.clone())
                        .set_next_token(next_token)
                        .send(),
                )
                .map_err(|e| map_ec2_error("describe_snapshots", e, &volume_id))?;

            snapshots.extend(output.snapshots.unwrap_or_default());
            next_token = output.next_token;
            if next_token.is_none() {
                break;
            }
        }

        debug!(volume_id = %volume_id, count = snapshots.len(), "Listed EC2 snapshots");
        Ok(snapshots)
    }

    fn delete_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let snapshot_id = snapshot.snapshot_id().unwrap_or_default();
        info!(snapshot_id = %snapshot_id, "Deleting EC2 snapshot");

        self.context
            .block_on(self.client.delete_snapshot().snapshot_id(snapshot_id).send())
            .map_err(|e| {
                let mapped = map_ec2_error("delete_snapshot", e, snapshot_id);
                error!(snapshot_id = %snapshot_id, error = ?mapped, "Failed to delete EC2 snapshot");
                mapped
            })?;
        Ok(())
    }

    fn resolve_id(&self, resource: &Volume) -> String {
        resource.volume_id().unwrap_or_default().to_string()
    }

    fn resolve_snapshot_name(&self, snapshot: &Snapshot) -> String {
        snapshot.description().unwrap_or_default().to_string()
    }

    fn snapshot_created_at(&self, snapshot: &Snapshot) -> Option<DateTime<Utc>> {
        snapshot.start_time().and_then(to_utc)
    }

    fn period_prefix(&self, period: &str) -> String {
        format!("{period}{SNAPSHOT_PREFIX_SUFFIX}")
    }
}

/// Map AWS SDK errors to RotateError with appropriate context
fn map_ec2_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    op: &str,
    error: SdkError<E>,
    target: &str,
) -> RotateError {
    match &error {
        SdkError::DispatchFailure(dispatch_err) => {
            RotateError::provider(format!("EC2 {op} request failed to dispatch: {dispatch_err:?}"))
        }
        SdkError::TimeoutError(_) => {
            RotateError::provider(format!("EC2 {op} request timed out ({target})"))
        }
        SdkError::ResponseError(response_err) => {
            RotateError::provider(format!("EC2 {op} response error: {response_err:?}"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("UnauthorizedOperation") => RotateError::provider(format!(
                "Access denied to EC2 {op} (check credentials and permissions)"
            )),
            Some("InvalidVolume.NotFound") => {
                RotateError::provider(format!("EC2 volume '{target}' not found"))
            }
            Some("InvalidSnapshot.NotFound") => {
                RotateError::provider(format!("EC2 snapshot '{target}' not found"))
            }
            Some("InvalidSnapshot.InUse") => {
                RotateError::provider(format!("EC2 snapshot '{target}' is in use"))
            }
            Some(code) => RotateError::provider(format!(
                "EC2 {op} service error ({code}): {}",
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => RotateError::provider(format!("EC2 {op} service error: {service_err:?}")),
        },
        _ => RotateError::provider(format!("EC2 {op} error: {error}")),
    }
}
