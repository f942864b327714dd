/*!
Invocation handler.

Runs one rotation pass per configured resource kind, forwards each result to
the notifier, and assembles the response: the echoed event plus a report and
a metrics object per kind, and the combined `metrics`.
*/

use serde_json::{Map, Value};
use tracing::info;

use crate::config::{RotationConfig, RotationEvent};
use crate::notify::{NotificationSink, Notifier};
use crate::provider::{ResourceKind, ResourceProvider};
use crate::rotation::{RotationEngine, RotationResult, RotationSummary};
use crate::Result;

/// Response of one invocation
#[derive(Debug, Clone)]
pub struct RotationResponse {
    body: Map<String, Value>,
    totals: RotationSummary,
}

impl RotationResponse {
    /// Start a response echoing `event`
    pub fn new(event: &RotationEvent) -> Result<Self> {
        let mut body = match serde_json::to_value(event)? {
            Value::Object(body) => body,
            _ => Map::new(),
        };
        body.insert(
            "metrics".to_string(),
            serde_json::to_value(RotationSummary::default())?,
        );
        Ok(Self {
            body,
            totals: RotationSummary::default(),
        })
    }

    /// Add the outcome of one resource kind
    pub fn record(&mut self, kind: ResourceKind, result: &RotationResult) -> Result<()> {
        let summary = result.summary();
        self.body.insert(
            format!("{}_backup_result", kind.label()),
            Value::String(result.report.clone()),
        );
        if result.has_errors() {
            self.body.insert(
                format!("{}_backup_errors", kind.label()),
                Value::String(result.error_report.clone()),
            );
        }
        self.body
            .insert(format!("{}_metrics", kind.label()), serde_json::to_value(summary)?);

        self.totals += summary;
        self.body
            .insert("metrics".to_string(), serde_json::to_value(self.totals)?);
        Ok(())
    }

    /// Combined metrics over every recorded kind
    pub fn totals(&self) -> RotationSummary {
        self.totals
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }

    /// Pretty-printed JSON body
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.body)?)
    }
}

/// Rotate one resource kind and notify about the outcome
pub fn rotate_kind<P, S>(
    provider: P,
    config: &RotationConfig,
    notifier: &Notifier<S>,
) -> Result<RotationResult>
where
    P: ResourceProvider,
    S: NotificationSink,
{
    config.validate()?;
    let kind = provider.kind();
    let result = RotationEngine::new(provider, config.clone()).run()?;
    info!(kind = %kind, "\n{}", result.report);
    notifier.notify(kind, &result)?;
    Ok(result)
}

/// Handle an invocation event against AWS
///
/// EC2 volumes are rotated when `ec2_region_name` is set, RDS instances when
/// `rds_region_name` is set. The SNS client lives in the EC2 region, falling
/// back to the RDS region.
#[cfg(feature = "aws")]
pub fn handle_event(event: &RotationEvent) -> Result<RotationResponse> {
    use crate::aws::AwsContext;
    use crate::notify::SnsNotifier;
    use crate::provider::{Ec2Provider, RdsProvider};
    use chrono::Local;

    event.validate()?;
    info!(event = ?event, "Received rotation event");

    let date_suffix = event.date_suffix(Local::now())?;
    let config = event.rotation_config(date_suffix);

    let context = AwsContext::load(event.notification_region())?;
    let notifier = Notifier::new(
        SnsNotifier::with_context(context.clone()),
        event.arn.clone(),
        event.error_arn.clone(),
    );

    let mut response = RotationResponse::new(event)?;
    for (kind, region) in event.configured_kinds() {
        let regional = context.for_region(region);
        let result = match kind {
            ResourceKind::Volume => {
                rotate_kind(Ec2Provider::with_context(regional), &config, &notifier)?
            }
            ResourceKind::Database => rotate_kind(
                RdsProvider::with_context(regional, &config.period, &config.date_suffix),
                &config,
                &notifier,
            )?,
        };
        response.record(kind, &result)?;
    }

    Ok(response)
}
