/*!
Notification delivery for finished rotation passes.

A [`Notifier`] decides what to publish and where; a [`NotificationSink`]
does the publishing. With no topics configured nothing is sent.
*/

#[cfg(feature = "aws")]
use aws_sdk_sns::error::{ProvideErrorMetadata, SdkError};
#[cfg(feature = "aws")]
use aws_sdk_sns::Client as SnsClient;
use tracing::info;

#[cfg(feature = "aws")]
use crate::aws::AwsContext;
use crate::provider::ResourceKind;
use crate::rotation::RotationResult;
#[cfg(feature = "aws")]
use crate::RotateError;
use crate::Result;

/// Subject used for error notifications
pub const ERROR_SUBJECT: &str = "Error with AWS Snapshot";

/// Destination for rotation notifications
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink {
    /// Publish `message` to `topic`
    fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<()>;
}

/// Routes rotation results to the report and error topics
#[derive(Debug, Clone)]
pub struct Notifier<S> {
    sink: S,
    report_topic: Option<String>,
    error_topic: Option<String>,
}

impl<S: NotificationSink> Notifier<S> {
    pub fn new(sink: S, report_topic: Option<String>, error_topic: Option<String>) -> Self {
        Self {
            sink,
            report_topic,
            error_topic,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.report_topic.is_some() || self.error_topic.is_some()
    }

    /// Publish the outcome of one pass
    ///
    /// The error narrative goes to the error topic first, when there is one;
    /// the full report then goes to the report topic.
    pub fn notify(&self, kind: ResourceKind, result: &RotationResult) -> Result<()> {
        if let Some(topic) = &self.error_topic {
            if result.has_errors() {
                info!(kind = %kind, topic = %topic, "Publishing rotation errors");
                let message = format!(
                    "Error in processing {}: {}",
                    kind.noun(),
                    result.error_report
                );
                self.sink.publish(topic, ERROR_SUBJECT, &message)?;
            }
        }

        if let Some(topic) = &self.report_topic {
            info!(kind = %kind, topic = %topic, "Publishing rotation report");
            let subject = format!("Finished AWS {} snapshotting", kind.service_name());
            self.sink.publish(topic, &subject, &result.report)?;
        }

        Ok(())
    }
}

/// Amazon SNS notification sink
#[cfg(feature = "aws")]
#[derive(Debug)]
pub struct SnsNotifier {
    client: SnsClient,
    context: AwsContext,
}

#[cfg(feature = "aws")]
impl SnsNotifier {
    pub fn with_context(context: AwsContext) -> Self {
        let client = SnsClient::new(context.config());
        info!(region = %context.region(), "Initialized SNS notifier");
        Self { client, context }
    }
}

#[cfg(feature = "aws")]
impl NotificationSink for SnsNotifier {
    fn publish(&self, topic: &str, subject: &str, message: &str) -> Result<()> {
        self.context
            .block_on(
                self.client
                    .publish()
                    .topic_arn(topic)
                    .subject(subject)
                    .message(message)
                    .send(),
            )
            .map_err(|e| map_sns_error(e, topic))?;
        Ok(())
    }
}

#[cfg(feature = "aws")]
fn map_sns_error<E: ProvideErrorMetadata + std::fmt::Debug>(
    error: SdkError<E>,
    topic: &str,
) -> RotateError {
    match &error {
        SdkError::TimeoutError(_) => {
            RotateError::notification(format!("SNS publish to {topic} timed out"))
        }
        SdkError::ServiceError(service_err) => match service_err.err().code() {
            Some("NotFound") => RotateError::notification(format!("SNS topic '{topic}' not found")),
            Some("AuthorizationError") => RotateError::notification(format!(
                "Access denied publishing to SNS topic '{topic}'"
            )),
            Some(code) => RotateError::notification(format!(
                "SNS publish service error ({code}): {}",
                service_err.err().message().unwrap_or("Unknown error")
            )),
            None => RotateError::notification(format!("SNS publish service error: {service_err:?}")),
        },
        _ => RotateError::notification(format!("SNS publish error: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RotateError;
    use mockall::predicate::eq;

    fn failed_result() -> RotationResult {
        RotationResult {
            resources_examined: 2,
            snapshots_created: 2,
            errors: 1,
            report: "Started taking day snapshots\n".to_string(),
            error_report: "Error in processing volumes with id: vol-1\n".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_publishes_errors_then_report() {
        let mut sink = MockNotificationSink::new();
        let mut seq = mockall::Sequence::new();
        sink.expect_publish()
            .with(
                eq("arn:errors"),
                eq(ERROR_SUBJECT),
                eq("Error in processing volumes: Error in processing volumes with id: vol-1\n"),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        sink.expect_publish()
            .with(
                eq("arn:reports"),
                eq("Finished AWS EC2 snapshotting"),
                eq("Started taking day snapshots\n"),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));

        let notifier = Notifier::new(
            sink,
            Some("arn:reports".to_string()),
            Some("arn:errors".to_string()),
        );
        notifier.notify(ResourceKind::Volume, &failed_result()).unwrap();
    }

    #[test]
    fn test_clean_run_skips_error_topic() {
        let mut sink = MockNotificationSink::new();
        sink.expect_publish()
            .withf(|topic, subject, _| topic == "arn:reports" && subject == "Finished AWS RDS snapshotting")
            .times(1)
            .returning(|_, _, _| Ok(()));

        let notifier = Notifier::new(
            sink,
            Some("arn:reports".to_string()),
            Some("arn:errors".to_string()),
        );
        let clean = RotationResult {
            report: "done\n".to_string(),
            ..Default::default()
        };
        notifier.notify(ResourceKind::Database, &clean).unwrap();
    }

    #[test]
    fn test_no_topics_is_noop() {
        let mut sink = MockNotificationSink::new();
        sink.expect_publish().times(0);

        let notifier = Notifier::new(sink, None, None);
        assert!(!notifier.is_enabled());
        notifier.notify(ResourceKind::Volume, &failed_result()).unwrap();
    }

    #[test]
    fn test_publish_failure_propagates() {
        let mut sink = MockNotificationSink::new();
        sink.expect_publish()
            .returning(|_, _, _| Err(RotateError::notification("throttled")));

        let notifier = Notifier::new(sink, Some("arn:reports".to_string()), None);
        let err = notifier.notify(ResourceKind::Volume, &failed_result()).unwrap_err();
        assert!(matches!(err, RotateError::Notification(_)));
    }
}
