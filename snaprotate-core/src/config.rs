//! Configuration module for rotation settings and invocation events
//!
//! This module provides the immutable [`RotationConfig`] consumed by the
//! rotation engine, and the [`RotationEvent`] accepted at the invocation
//! boundary, which is resolved into one `RotationConfig` per pass.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::io::Read;
use std::path::Path;

use crate::provider::ResourceKind;
use crate::{Result, RotateError};

/// Settings for a single rotation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Rotation period label, e.g. "day"
    pub period: String,
    /// Tag key selecting candidate resources
    pub tag_key: String,
    /// Tag value selecting candidate resources
    pub tag_value: String,
    /// Pre-formatted suffix embedded in snapshot names
    pub date_suffix: String,
    /// Owned snapshots to keep per resource; 0 deletes every owned snapshot
    pub keep_count: usize,
}

impl RotationConfig {
    pub fn new<P, K, V, D>(period: P, tag_key: K, tag_value: V, date_suffix: D, keep_count: usize) -> Self
    where
        P: Into<String>,
        K: Into<String>,
        V: Into<String>,
        D: Into<String>,
    {
        Self {
            period: period.into(),
            tag_key: tag_key.into(),
            tag_value: tag_value.into(),
            date_suffix: date_suffix.into(),
            keep_count,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.period.trim().is_empty() {
            return Err(RotateError::validation("period label must not be empty"));
        }
        if self.tag_key.trim().is_empty() {
            return Err(RotateError::validation("tag key must not be empty"));
        }
        Ok(())
    }
}

/// Invocation event describing which resources to rotate
///
/// Unknown fields are kept in `extra` so the response can echo the event
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationEvent {
    pub period_label: String,
    /// strftime pattern resolved against local time into the date suffix
    pub period_format: String,
    pub tag_name: String,
    pub tag_value: String,
    pub keep_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ec2_region_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rds_region_name: Option<String>,
    /// Topic receiving the finished report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    /// Topic receiving per-resource error narratives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_arn: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RotationEvent {
    /// Parse and validate an event from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let event: RotationEvent = serde_json::from_str(json)?;
        event.validate()?;
        Ok(event)
    }

    /// Parse and validate an event from any reader
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        let mut json = String::new();
        reader.read_to_string(&mut json)?;
        Self::from_json(&json)
    }

    /// Parse and validate an event stored in a file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validate the event
    pub fn validate(&self) -> Result<()> {
        if self.period_format.is_empty() {
            return Err(RotateError::validation("period_format must not be empty"));
        }
        self.date_suffix(Local::now())?;
        self.rotation_config(String::new()).validate()
    }

    /// Resolve `period_format` against `now`
    ///
    /// Unknown strftime specifiers surface as a validation error instead of
    /// a formatting panic.
    pub fn date_suffix(&self, now: DateTime<Local>) -> Result<String> {
        let mut suffix = String::new();
        write!(suffix, "{}", now.format(&self.period_format)).map_err(|_| {
            RotateError::validation(format!(
                "invalid period_format '{}'",
                self.period_format
            ))
        })?;
        Ok(suffix)
    }

    /// Build the rotation settings for this event with a resolved date suffix
    pub fn rotation_config(&self, date_suffix: String) -> RotationConfig {
        RotationConfig::new(
            self.period_label.clone(),
            self.tag_name.clone(),
            self.tag_value.clone(),
            date_suffix,
            self.keep_count,
        )
    }

    /// Region configured for a resource kind, if that kind should be rotated
    pub fn region_for(&self, kind: ResourceKind) -> Option<&str> {
        match kind {
            ResourceKind::Volume => self.ec2_region_name.as_deref(),
            ResourceKind::Database => self.rds_region_name.as_deref(),
        }
    }

    /// Resource kinds with a configured region, in processing order
    pub fn configured_kinds(&self) -> Vec<(ResourceKind, &str)> {
        [ResourceKind::Volume, ResourceKind::Database]
            .into_iter()
            .filter_map(|kind| self.region_for(kind).map(|region| (kind, region)))
            .collect()
    }

    /// Region used for the notification client
    pub fn notification_region(&self) -> Option<&str> {
        self.ec2_region_name
            .as_deref()
            .or(self.rds_region_name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const EVENT: &str = r#"{
        "period_label": "day",
        "period_format": "%a%H",
        "ec2_region_name": "ap-southeast-2",
        "tag_name": "MakeSnapshot",
        "tag_value": "True",
        "arn": "arn:aws:sns:ap-southeast-2:123456789012:reports",
        "keep_count": 12,
        "comment": "nightly"
    }"#;

    #[test]
    fn test_parse_event() {
        let event = RotationEvent::from_json(EVENT).unwrap();
        assert_eq!(event.period_label, "day");
        assert_eq!(event.keep_count, 12);
        assert_eq!(event.ec2_region_name.as_deref(), Some("ap-southeast-2"));
        assert!(event.rds_region_name.is_none());
        assert!(event.error_arn.is_none());
        assert_eq!(event.extra["comment"], "nightly");
    }

    #[test]
    fn test_event_echo_keeps_unknown_fields() {
        let event = RotationEvent::from_json(EVENT).unwrap();
        let echoed = serde_json::to_value(&event).unwrap();
        assert_eq!(echoed["comment"], "nightly");
        assert_eq!(echoed["tag_name"], "MakeSnapshot");
        assert!(echoed.get("rds_region_name").is_none());
    }

    #[test]
    fn test_negative_keep_count_rejected() {
        let json = EVENT.replace("\"keep_count\": 12", "\"keep_count\": -1");
        assert!(matches!(
            RotationEvent::from_json(&json),
            Err(RotateError::Json(_))
        ));
    }

    #[test]
    fn test_empty_tag_name_rejected() {
        let json = EVENT.replace("\"MakeSnapshot\"", "\"\"");
        let err = RotationEvent::from_json(&json).unwrap_err();
        assert!(err.to_string().contains("tag key"));
    }

    #[test]
    fn test_date_suffix() {
        let event = RotationEvent::from_json(EVENT).unwrap();
        let now = Local.with_ymd_and_hms(2024, 3, 16, 14, 5, 0).unwrap();
        assert_eq!(event.date_suffix(now).unwrap(), "Sat14");
    }

    #[test]
    fn test_invalid_period_format() {
        let json = EVENT.replace("%a%H", "%Q");
        let err = RotationEvent::from_json(&json).unwrap_err();
        assert!(matches!(err, RotateError::Validation(_)));
    }

    #[test]
    fn test_rotation_config_from_event() {
        let event = RotationEvent::from_json(EVENT).unwrap();
        let config = event.rotation_config("Sat14".to_string());
        assert_eq!(
            config,
            RotationConfig::new("day", "MakeSnapshot", "True", "Sat14", 12)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configured_kinds() {
        let mut event = RotationEvent::from_json(EVENT).unwrap();
        assert_eq!(
            event.configured_kinds(),
            vec![(ResourceKind::Volume, "ap-southeast-2")]
        );

        event.rds_region_name = Some("eu-west-1".to_string());
        event.ec2_region_name = None;
        assert_eq!(
            event.configured_kinds(),
            vec![(ResourceKind::Database, "eu-west-1")]
        );
        assert_eq!(event.notification_region(), Some("eu-west-1"));
    }

    #[test]
    fn test_validate_rotation_config() {
        let config = RotationConfig::new("", "MakeSnapshot", "True", "Sat14", 1);
        assert!(config.validate().is_err());

        let config = RotationConfig::new("week", " ", "True", "Sat14", 1);
        assert!(config.validate().is_err());

        let config = RotationConfig::new("week", "MakeSnapshot", "", "Sat14", 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EVENT.as_bytes()).unwrap();

        let event = RotationEvent::from_path(file.path()).unwrap();
        assert_eq!(event.tag_value, "True");

        let missing = RotationEvent::from_path(file.path().with_extension("missing"));
        assert!(matches!(missing, Err(RotateError::Io(_))));
    }
}
