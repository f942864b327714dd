/*!
End-to-end rotation scenarios against the in-memory provider.

Each scenario drives a full pass through the handler, the way an invocation
would, and checks the report, the metrics and what is left in the fleet.
*/

use chrono::{Duration, Utc};
use snaprotate_core::{
    rotate_kind, MemoryProvider, MemoryResource, NotificationSink, Notifier, ResourceKind,
    RotationConfig, RotationEvent, RotationResponse, RotationSummary,
};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct CapturedSink {
    messages: Arc<Mutex<Vec<(String, String, String)>>>,
}

impl CapturedSink {
    fn messages(&self) -> Vec<(String, String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

impl NotificationSink for CapturedSink {
    fn publish(&self, topic: &str, subject: &str, message: &str) -> snaprotate_core::Result<()> {
        self.messages.lock().unwrap().push((
            topic.to_string(),
            subject.to_string(),
            message.to_string(),
        ));
        Ok(())
    }
}

fn config(keep_count: usize) -> RotationConfig {
    RotationConfig::new("day", "MakeSnapshot", "True", "Sat14", keep_count)
}

fn silent() -> Notifier<CapturedSink> {
    Notifier::new(CapturedSink::default(), None, None)
}

fn fleet() -> MemoryProvider {
    let provider = MemoryProvider::new();
    provider.add_resource(MemoryResource::new("vol-1").with_tag("MakeSnapshot", "True"));
    provider.add_resource(MemoryResource::new("vol-2").with_tag("Name", "Anotherone"));
    provider
}

#[test]
fn test_first_snapshot_of_new_volume() {
    let provider = fleet();

    let result = rotate_kind(provider.clone(), &config(2), &silent()).unwrap();
    assert_eq!(
        result.summary(),
        RotationSummary {
            total_resources: 1,
            total_creates: 1,
            total_deletes: 0,
            total_errors: 0,
        }
    );

    let snapshots = provider.snapshots_of("vol-1");
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].name.starts_with("day_snapshot vol-1_day_Sat14 by snapshot script at "));
    assert!(provider.snapshots_of("vol-2").is_empty());
}

#[test]
fn test_rotation_prunes_to_keep_count() {
    let provider = fleet();
    let base = Utc::now() - Duration::days(2);
    provider.add_snapshot("vol-1", "day_snapshot vol-1_day_Thu14", Some(base));
    provider.add_snapshot(
        "vol-1",
        "day_snapshot vol-1_day_Fri14",
        Some(base + Duration::days(1)),
    );

    let result = rotate_kind(provider.clone(), &config(1), &silent()).unwrap();
    assert_eq!(
        result.summary(),
        RotationSummary {
            total_resources: 1,
            total_creates: 1,
            total_deletes: 2,
            total_errors: 0,
        }
    );

    let remaining = provider.snapshots_of("vol-1");
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].name.starts_with("day_snapshot vol-1_day_Sat14"));
}

#[test]
fn test_other_periods_and_tools_are_untouched() {
    let provider = fleet();
    let old = Utc::now() - Duration::days(30);
    provider.add_snapshot("vol-1", "week_snapshot vol-1_week_12", Some(old));
    provider.add_snapshot("vol-1", "Created by CreateImage(i-0abc)", Some(old));
    provider.add_snapshot("vol-1", "day_snapshot vol-1_day_Fri14", Some(old));

    let result = rotate_kind(provider.clone(), &config(1), &silent()).unwrap();
    assert_eq!(result.snapshots_deleted, 1);

    let names: Vec<_> = provider
        .snapshots_of("vol-1")
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert!(names.contains(&"week_snapshot vol-1_week_12".to_string()));
    assert!(names.contains(&"Created by CreateImage(i-0abc)".to_string()));
    assert!(!names.contains(&"day_snapshot vol-1_day_Fri14".to_string()));
}

#[test]
fn test_snapshot_copies_resource_tags() {
    let provider = MemoryProvider::new();
    provider.add_resource(
        MemoryResource::new("vol-1")
            .with_tag("MakeSnapshot", "True")
            .with_tag("Owner", "platform")
            .with_tag("aws:cloudformation:stack-name", "infra"),
    );

    rotate_kind(provider.clone(), &config(3), &silent()).unwrap();

    let snapshot = &provider.snapshots_of("vol-1")[0];
    assert_eq!(snapshot.tags.get("Owner").map(String::as_str), Some("platform"));
    assert_eq!(snapshot.tags.get("MakeSnapshot").map(String::as_str), Some("True"));
    assert!(!snapshot.tags.contains_key("aws:cloudformation:stack-name"));
}

#[test]
fn test_errors_reach_both_topics() {
    let provider = fleet();
    provider.add_resource(MemoryResource::new("vol-3").with_tag("MakeSnapshot", "True"));
    provider.fail_listing_for("vol-1");

    let sink = CapturedSink::default();
    let notifier = Notifier::new(
        sink.clone(),
        Some("arn:reports".to_string()),
        Some("arn:errors".to_string()),
    );

    let result = rotate_kind(provider, &config(2), &notifier).unwrap();
    assert_eq!(result.errors, 1);
    assert_eq!(result.snapshots_created, 2);

    let messages = sink.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0, "arn:errors");
    assert_eq!(messages[0].1, "Error with AWS Snapshot");
    assert_eq!(
        messages[0].2,
        "Error in processing volumes: Error in processing volumes with id: vol-1\n"
    );
    assert_eq!(messages[1].0, "arn:reports");
    assert_eq!(messages[1].2, result.report);
}

#[test]
fn test_response_for_volumes_and_databases() {
    let event = RotationEvent::from_json(
        r#"{
            "period_label": "day",
            "period_format": "%a%H",
            "ec2_region_name": "ap-southeast-2",
            "rds_region_name": "ap-southeast-2",
            "tag_name": "MakeSnapshot",
            "tag_value": "True",
            "keep_count": 1,
            "schedule": "cron(0 14 * * ? *)"
        }"#,
    )
    .unwrap();
    let config = event.rotation_config("Sat14".to_string());

    let volumes = fleet();
    let databases = MemoryProvider::new()
        .with_kind(ResourceKind::Database)
        .with_prefix_suffix("");
    databases.add_resource(MemoryResource::new("db-1").with_tag("MakeSnapshot", "True"));
    databases.add_snapshot(
        "db-1",
        "day-db-1-01-03-2024-14-00-00-Fri14",
        Some(Utc::now() - Duration::days(1)),
    );

    let mut response = RotationResponse::new(&event).unwrap();
    let result = rotate_kind(volumes, &config, &silent()).unwrap();
    response.record(ResourceKind::Volume, &result).unwrap();
    let result = rotate_kind(databases, &config, &silent()).unwrap();
    response.record(ResourceKind::Database, &result).unwrap();

    let body = response.into_value();
    assert_eq!(body["schedule"], "cron(0 14 * * ? *)");
    assert_eq!(body["ec2_metrics"]["total_creates"], 1);
    assert_eq!(body["rds_metrics"]["total_deletes"], 1);
    assert_eq!(body["metrics"]["total_resources"], 2);
    assert_eq!(body["metrics"]["total_creates"], 2);
    assert_eq!(body["metrics"]["total_deletes"], 1);
    assert!(body["rds_backup_result"]
        .as_str()
        .unwrap()
        .contains("Processing backup item db-1"));
}
