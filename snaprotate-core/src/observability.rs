/*!
Observability infrastructure for snapshot rotation.

This module provides:
- Structured logging and tracing setup
- Prometheus counters for rotation passes (behind the `metrics` feature)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

#[cfg(feature = "metrics")]
use crate::provider::ResourceKind;
#[cfg(feature = "metrics")]
use crate::rotation::RotationResult;
use crate::{Result, RotateError};

#[cfg(feature = "metrics")]
static METRICS: OnceLock<std::result::Result<RotationMetrics, String>> = OnceLock::new();

/// Counters for rotation passes, labelled by resource kind
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct RotationMetrics {
    pub resources_total: IntCounterVec,
    pub snapshots_created_total: IntCounterVec,
    pub snapshots_deleted_total: IntCounterVec,
    pub errors_total: IntCounterVec,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
impl RotationMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let resources_total = register_counter(
            &registry,
            "snaprotate_resources_total",
            "Resources examined by rotation passes",
        )?;
        let snapshots_created_total = register_counter(
            &registry,
            "snaprotate_snapshots_created_total",
            "Snapshots created by rotation passes",
        )?;
        let snapshots_deleted_total = register_counter(
            &registry,
            "snaprotate_snapshots_deleted_total",
            "Snapshots deleted by rotation passes",
        )?;
        let errors_total = register_counter(
            &registry,
            "snaprotate_errors_total",
            "Resources that failed during rotation passes",
        )?;

        Ok(Self {
            resources_total,
            snapshots_created_total,
            snapshots_deleted_total,
            errors_total,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    pub fn global() -> Result<&'static RotationMetrics> {
        METRICS
            .get_or_init(|| Self::new().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| RotateError::configuration(e.clone()))
    }

    /// Add the counters of one finished pass
    pub fn record_pass(&self, kind: ResourceKind, result: &RotationResult) {
        let label = [kind.label()];
        self.resources_total
            .with_label_values(&label)
            .inc_by(result.resources_examined as u64);
        self.snapshots_created_total
            .with_label_values(&label)
            .inc_by(result.snapshots_created as u64);
        self.snapshots_deleted_total
            .with_label_values(&label)
            .inc_by(result.snapshots_deleted as u64);
        self.errors_total
            .with_label_values(&label)
            .inc_by(result.errors as u64);
    }

    /// Gather metrics in Prometheus format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| RotateError::configuration(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            RotateError::configuration(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

#[cfg(feature = "metrics")]
fn register_counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &["kind"])
        .map_err(|e| RotateError::configuration(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| RotateError::configuration(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence; otherwise `debug` when `verbose`, else `info`.
///
/// # Arguments
/// * `verbose` - Default to debug level
/// * `json` - Emit JSON lines instead of human-readable output
pub fn init_observability(verbose: bool, json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    RotationMetrics::global()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        RotateError::configuration(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Rotation observability initialized");
    Ok(())
}

/// Initialize observability with default settings
pub fn init_default_observability() -> Result<()> {
    init_observability(false, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Only one global subscriber may exist per process
        let _ = init_default_observability();
        assert!(init_default_observability().is_err());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_record_and_gather() {
        let metrics = RotationMetrics::global().unwrap();
        let result = RotationResult {
            resources_examined: 2,
            snapshots_created: 2,
            snapshots_deleted: 3,
            errors: 0,
            ..Default::default()
        };
        metrics.record_pass(ResourceKind::Volume, &result);

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("snaprotate_snapshots_deleted_total"));
        assert!(text.contains("kind=\"ec2\""));
    }
}
