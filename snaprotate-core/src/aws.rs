/*!
Shared AWS client plumbing.

The rotation engine is synchronous; AWS-backed adapters drive the async SDK
through a runtime they own, blocking on each call.
*/

use aws_config::{BehaviorVersion, Region, SdkConfig};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;

use crate::{Result, RotateError};

/// Runtime plus SDK configuration shared by the AWS adapters
#[derive(Debug, Clone)]
pub struct AwsContext {
    runtime: Arc<Runtime>,
    config: SdkConfig,
}

impl AwsContext {
    /// Load AWS configuration from the environment
    ///
    /// # Arguments
    /// * `region` - Region override; `None` falls back to the environment default
    ///
    /// # Errors
    /// Returns an error if:
    /// - The Tokio runtime cannot be created
    /// - AWS credentials are not available
    pub fn load(region: Option<&str>) -> Result<Self> {
        let runtime = build_runtime()?;

        let config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region.to_string()));
            }
            loader.load().await
        });

        if config.credentials_provider().is_none() {
            return Err(RotateError::configuration(
                "AWS credentials not found. Please set AWS_ACCESS_KEY_ID, AWS_SECRET_ACCESS_KEY, and AWS_REGION environment variables",
            ));
        }

        info!(region = ?config.region(), "Loaded AWS configuration");

        Ok(Self {
            runtime: Arc::new(runtime),
            config,
        })
    }

    /// Wrap an explicit SDK configuration
    pub fn with_config(config: SdkConfig) -> Result<Self> {
        Ok(Self {
            runtime: Arc::new(build_runtime()?),
            config,
        })
    }

    /// Same runtime, configuration pointed at another region
    pub fn for_region(&self, region: &str) -> Self {
        let config = self
            .config
            .to_builder()
            .region(Region::new(region.to_string()))
            .build();
        Self {
            runtime: Arc::clone(&self.runtime),
            config,
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Region of the configuration, or an empty string when unset
    pub fn region(&self) -> String {
        self.config
            .region()
            .map(|region| region.to_string())
            .unwrap_or_default()
    }

    /// Run an SDK future to completion
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            RotateError::configuration(format!(
                "Failed to create async runtime for AWS clients: {e}"
            ))
        })
}
