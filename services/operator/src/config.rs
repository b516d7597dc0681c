//! Configuration for the operator.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

/// Registry credentials for image pushes.
#[derive(Debug, Clone)]
pub enum RegistryAuth {
    /// Username/password pair passed to the push.
    Basic { username: String, password: String },

    /// Path to a container auth file.
    AuthFile(PathBuf),
}

/// Operator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Use mock collaborators instead of the node proxy and buildah.
    pub dev_mode: bool,

    /// Cluster API base URL for the node-proxy capture client.
    pub api_base_url: String,

    /// Directory holding captured checkpoint artifacts.
    pub checkpoints_dir: PathBuf,

    /// Registry prefix for published runtime images.
    pub image_registry: String,

    /// HTTP timeout for capture calls.
    pub capture_timeout: Duration,

    /// Requeue delay while a request is in progress.
    pub in_progress_requeue: Duration,

    /// Credentials for image pushes, if the registry needs them.
    pub registry_auth: Option<RegistryAuth>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let log_level = std::env::var("CRYO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("CRYO_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let api_base_url = std::env::var("CRYO_API_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8001".to_string());

        let checkpoints_dir = std::env::var("CRYO_CHECKPOINTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/lib/kubelet/checkpoints"));

        let image_registry =
            std::env::var("CRYO_IMAGE_REGISTRY").unwrap_or_else(|_| "localhost:5000".to_string());

        let capture_timeout_secs = std::env::var("CRYO_CAPTURE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);

        let in_progress_requeue_secs = std::env::var("CRYO_IN_PROGRESS_REQUEUE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let registry_auth = registry_auth_from_env();

        Ok(Self {
            log_level,
            dev_mode,
            api_base_url,
            checkpoints_dir,
            image_registry,
            capture_timeout: Duration::from_secs(capture_timeout_secs),
            in_progress_requeue: Duration::from_secs(in_progress_requeue_secs),
            registry_auth,
        })
    }
}

fn registry_auth_from_env() -> Option<RegistryAuth> {
    let username = std::env::var("CRYO_REGISTRY_USERNAME").ok();
    let password = std::env::var("CRYO_REGISTRY_PASSWORD").ok();
    if let (Some(username), Some(password)) = (username, password) {
        return Some(RegistryAuth::Basic { username, password });
    }

    std::env::var("CRYO_REGISTRY_AUTH_FILE")
        .ok()
        .map(|p| RegistryAuth::AuthFile(PathBuf::from(p)))
}
