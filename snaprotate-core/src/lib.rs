/*!
# Snaprotate Core Engine

Tag-driven rotation of cloud block-storage and database snapshots.

On each invocation the engine discovers the resources carrying a configured
tag, takes one new snapshot of each, and prunes that resource's snapshots for
the current period so that only the newest `keep_count` remain. Failures are
isolated per resource and summarized in a human-readable report.

- EC2 volumes and RDS instances behind a common [`ResourceProvider`] port
- An in-memory provider for tests and dry runs
- SNS notifications for reports and error narratives
- Structured logging with optional Prometheus counters

## Architecture

The core follows hexagonal architecture principles:
- The rotation algorithm only talks to [`ResourceProvider`] and [`NotificationSink`]
- AWS services are adapters behind the `aws` feature
- Snapshots owned by other periods or tools are never touched

## Usage

```rust
use snaprotate_core::{MemoryProvider, MemoryResource, RotationConfig, RotationEngine};

let provider = MemoryProvider::new();
provider.add_resource(MemoryResource::new("vol-1").with_tag("MakeSnapshot", "True"));

let config = RotationConfig::new("day", "MakeSnapshot", "True", "Sat14", 3);
let result = RotationEngine::new(provider, config).run()?;
assert_eq!(result.snapshots_created, 1);
# Ok::<(), snaprotate_core::RotateError>(())
```
*/

#[cfg(feature = "aws")]
pub mod aws;
pub mod config;
pub mod error;
pub mod handler;
pub mod notify;
pub mod observability;
pub mod provider;
pub mod rotation;


pub use config::{RotationConfig, RotationEvent};
pub use error::{Result, RotateError};
pub use handler::{rotate_kind, RotationResponse};
#[cfg(feature = "aws")]
pub use handler::handle_event;
pub use notify::{NotificationSink, Notifier, ERROR_SUBJECT};
#[cfg(feature = "aws")]
pub use notify::SnsNotifier;
#[cfg(feature = "metrics")]
pub use observability::RotationMetrics;
pub use observability::{init_default_observability, init_observability};
pub use provider::{
    MemoryProvider, MemoryResource, MemorySnapshot, ResourceKind, ResourceProvider, Tags,
};
#[cfg(feature = "aws")]
pub use provider::{Ec2Provider, RdsProvider};
pub use rotation::{RotationEngine, RotationResult, RotationSummary};
