//! Checkpoint image building and publishing.
//!
//! The image builder wraps a checkpoint artifact into a single-layer OCI
//! image carrying the CRI-O restore annotation, then pushes it to the
//! registry the nodes pull from. The production implementation drives the
//! `buildah` CLI; a mock implementation is provided for testing and
//! development.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{Config, RegistryAuth};

/// Annotation CRI-O reads to treat an image as a restorable checkpoint.
const CHECKPOINT_ANNOTATION: &str = "io.kubernetes.cri-o.annotations.checkpoint.name";

/// Checkpoint image build interface.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build a local image from a checkpoint artifact.
    ///
    /// Returns the committed local image name.
    async fn build_from_checkpoint(
        &self,
        artifact: &Path,
        container: &str,
        image: &str,
    ) -> Result<String>;

    /// Push a committed local image to the node-visible registry.
    async fn push_to_node_runtime(&self, local_image: &str, runtime_image: &str) -> Result<()>;
}

/// Image builder driving the buildah CLI.
pub struct BuildahBuilder {
    registry_auth: Option<RegistryAuth>,
}

impl BuildahBuilder {
    /// Create a new buildah-backed builder.
    pub fn new(config: &Config) -> Self {
        Self {
            registry_auth: config.registry_auth.clone(),
        }
    }

    async fn assemble(
        &self,
        working: &str,
        artifact: &str,
        container: &str,
        image: &str,
    ) -> Result<String> {
        run_buildah(&["add", working, artifact, "/"]).await?;

        let annotation = format!("{}={}", CHECKPOINT_ANNOTATION, container);
        run_buildah(&["config", "--annotation", &annotation, working]).await?;

        let local_image = format!("localhost/{}", image);
        run_buildah(&["commit", working, &local_image]).await?;

        debug!(image = %local_image, "Checkpoint image committed");
        Ok(local_image)
    }
}

#[async_trait]
impl ImageBuilder for BuildahBuilder {
    async fn build_from_checkpoint(
        &self,
        artifact: &Path,
        container: &str,
        image: &str,
    ) -> Result<String> {
        let artifact_path = artifact.to_string_lossy();
        info!(
            artifact = %artifact_path,
            container = %container,
            image = %image,
            "Building checkpoint image"
        );

        let working = run_buildah(&["from", "scratch"]).await?;

        let result = self
            .assemble(&working, &artifact_path, container, image)
            .await;

        // Remove the working container whether or not the build succeeded.
        let _ = run_buildah(&["rm", &working]).await;

        result
    }

    async fn push_to_node_runtime(&self, local_image: &str, runtime_image: &str) -> Result<()> {
        info!(
            local_image = %local_image,
            runtime_image = %runtime_image,
            "Pushing checkpoint image"
        );

        let args = push_args(local_image, runtime_image, self.registry_auth.as_ref());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_buildah(&arg_refs).await?;

        Ok(())
    }
}

/// Assemble the push argument list, including registry credentials.
fn push_args(local_image: &str, runtime_image: &str, auth: Option<&RegistryAuth>) -> Vec<String> {
    let mut args = vec!["push".to_string(), "--tls-verify=false".to_string()];

    match auth {
        Some(RegistryAuth::Basic { username, password }) => {
            args.push("--creds".to_string());
            args.push(format!("{}:{}", username, password));
        }
        Some(RegistryAuth::AuthFile(path)) => {
            args.push("--authfile".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        None => {}
    }

    args.push(local_image.to_string());
    args.push(format!("docker://{}", runtime_image));
    args
}

/// Run a `buildah` subcommand and return its trimmed stdout.
///
/// Push credentials may appear in `args`; error messages name the
/// subcommand only.
async fn run_buildah(args: &[&str]) -> Result<String> {
    let output = Command::new("buildah")
        .args(args)
        .output()
        .await
        .context("failed to execute buildah")?;

    if !output.status.success() {
        let subcommand = args.first().copied().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("buildah {} failed: {}", subcommand, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Mock image builder for testing and development.
pub struct MockBuilder {
    /// Number of images built.
    builds: AtomicU64,

    /// Number of images pushed.
    pushes: AtomicU64,

    /// Whether builds should "fail".
    fail_builds: bool,

    /// Whether pushes should "fail".
    fail_pushes: bool,
}

impl MockBuilder {
    /// Create a new mock builder.
    pub fn new() -> Self {
        Self {
            builds: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
            fail_builds: false,
            fail_pushes: false,
        }
    }

    /// Create a mock builder that fails every build.
    pub fn failing() -> Self {
        Self {
            fail_builds: true,
            ..Self::new()
        }
    }

    /// Create a mock builder that builds but fails every push.
    pub fn failing_push() -> Self {
        Self {
            fail_pushes: true,
            ..Self::new()
        }
    }

    /// Number of successful builds so far.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Number of successful pushes so far.
    pub fn push_count(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }
}

impl Default for MockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageBuilder for MockBuilder {
    async fn build_from_checkpoint(
        &self,
        artifact: &Path,
        container: &str,
        image: &str,
    ) -> Result<String> {
        if self.fail_builds {
            anyhow::bail!("Mock builder configured to fail builds");
        }

        self.builds.fetch_add(1, Ordering::SeqCst);
        let local_image = format!("localhost/{}", image);
        info!(
            artifact = %artifact.display(),
            container = %container,
            image = %local_image,
            "[MOCK] Built checkpoint image"
        );
        Ok(local_image)
    }

    async fn push_to_node_runtime(&self, local_image: &str, runtime_image: &str) -> Result<()> {
        if self.fail_pushes {
            anyhow::bail!("Mock builder configured to fail pushes");
        }

        self.pushes.fetch_add(1, Ordering::SeqCst);
        info!(
            local_image = %local_image,
            runtime_image = %runtime_image,
            "[MOCK] Pushed checkpoint image"
        );
        Ok(())
    }
}
