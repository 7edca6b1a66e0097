//! Client configuration.
//!
//! Read from `chunklift/config.json` under the platform config directory.
//! Every field has a default, so a partial or missing file is fine; command
//! line flags override whatever the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunklift_transfer::DEFAULT_THRESHOLD_MB;
use chunklift_uploader::UploadOptions;
use chunklift_uploader::credentials::config_dir;
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the upload service (`{uploadUrl}`).
    pub upload_url: String,
    pub chunk_size_mb: u64,
    pub parallel_uploads: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Files at or below this size are refused unless forced.
    pub threshold_mb: u64,
    /// Per-request timeout; unset means no timeout.
    pub request_timeout_secs: Option<u64>,
    /// Bearer token; the token store is consulted when unset.
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            upload_url: String::new(),
            chunk_size_mb: 5,
            parallel_uploads: 3,
            max_retries: 3,
            retry_delay_ms: 1000,
            threshold_mb: DEFAULT_THRESHOLD_MB,
            request_timeout_secs: None,
            token: None,
        }
    }
}

impl ClientConfig {
    /// Loads the config from `path`, or from the default location.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => match default_config_path() {
                Some(path) => Self::load_from(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Loads the config from `path`. A missing file yields the defaults; an
    /// unparsable one is reported and ignored.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str::<Self>(&content) {
            Ok(config) => {
                tracing::debug!(path = %path.display(), "loaded client config");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse client config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Session options derived from this config.
    pub fn upload_options(&self) -> UploadOptions {
        UploadOptions {
            chunk_size: self.chunk_size_mb.saturating_mul(MIB),
            parallel_uploads: self.parallel_uploads,
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Returns the default config path: `chunklift/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("chunklift").join("config.json"))
}
