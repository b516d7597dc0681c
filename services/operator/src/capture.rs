//! Checkpoint capture interface and implementations.
//!
//! The capture service asks the node hosting a workload instance to freeze
//! one container and write its state to a local artifact. The production
//! implementation goes through the cluster API node proxy; a mock
//! implementation is provided for testing and development.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::config::Config;

/// Checkpoint capture interface.
#[async_trait]
pub trait CaptureService: Send + Sync {
    /// Capture the container's state on its node.
    ///
    /// Returns the artifact path reported by the node.
    async fn checkpoint(
        &self,
        node: &str,
        instance: &str,
        namespace: &str,
        container: &str,
    ) -> Result<String>;
}

/// Capture client speaking to the cluster API node proxy.
pub struct NodeProxyCapture {
    client: reqwest::Client,
    base_url: String,
}

/// Node proxy response listing the written artifacts.
#[derive(Debug, Deserialize)]
struct CheckpointResponse {
    items: Vec<String>,
}

impl NodeProxyCapture {
    /// Create a new capture client.
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.capture_timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CaptureService for NodeProxyCapture {
    async fn checkpoint(
        &self,
        node: &str,
        instance: &str,
        namespace: &str,
        container: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/api/v1/nodes/{}/proxy/checkpoint/{}/{}/{}",
            self.base_url, node, namespace, instance, container
        );
        debug!(url = %url, "Requesting checkpoint capture");

        let response = self.client.post(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Capture request rejected");
            anyhow::bail!("Capture request failed: {} - {}", status, body);
        }

        let payload: CheckpointResponse = response.json().await?;
        let artifact = payload
            .items
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Capture response contained no artifacts"))?;

        debug!(artifact = %artifact, "Capture complete");
        Ok(artifact)
    }
}

/// Mock capture service for testing and development.
pub struct MockCapture {
    /// Number of captures performed.
    captures: AtomicU64,

    /// Whether captures should "fail".
    fail_captures: bool,
}

impl MockCapture {
    /// Create a new mock capture service.
    pub fn new() -> Self {
        Self {
            captures: AtomicU64::new(0),
            fail_captures: false,
        }
    }

    /// Create a mock capture service that fails every call.
    pub fn failing() -> Self {
        Self {
            captures: AtomicU64::new(0),
            fail_captures: true,
        }
    }

    /// Number of successful captures so far.
    pub fn capture_count(&self) -> u64 {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Default for MockCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaptureService for MockCapture {
    async fn checkpoint(
        &self,
        node: &str,
        instance: &str,
        namespace: &str,
        container: &str,
    ) -> Result<String> {
        if self.fail_captures {
            anyhow::bail!("Mock capture configured to fail");
        }

        self.captures.fetch_add(1, Ordering::SeqCst);
        let artifact = format!(
            "/var/lib/kubelet/checkpoints/checkpoint-{}_{}-{}-{}.tar",
            instance,
            namespace,
            container,
            Utc::now().timestamp()
        );

        info!(
            node = %node,
            artifact = %artifact,
            "[MOCK] Captured checkpoint"
        );
        Ok(artifact)
    }
}
