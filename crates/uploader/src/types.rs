//! Options, lifecycle states and callback types.

use std::time::Duration;

use chunklift_protocol::FinalizeUploadResponse;
use chunklift_transfer::{DEFAULT_CHUNK_SIZE, ProgressSnapshot};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::retry::RetryPolicy;

/// Lifecycle of an upload session.
///
/// `Created → Initializing → Transferring → Finalizing → Completed`.
/// `Failed` is entered on a terminal error and left only through
/// `resume()`; `Aborted` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    Initializing,
    Transferring,
    Finalizing,
    Completed,
    Failed,
    Aborted,
}

impl SessionState {
    /// Returns `true` while an init/transfer/finalize run is in progress.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::Transferring | Self::Finalizing
        )
    }

    /// Returns `true` for states no operation can leave.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Tunables for one upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Bytes per chunk (default 5 MiB).
    pub chunk_size: u64,
    /// Maximum chunk transfers in flight (default 3).
    pub parallel_uploads: usize,
    /// Extra attempts per chunk after the first failure (default 3).
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `base_delay × n` (default 1 s).
    pub base_delay: Duration,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel_uploads: 3,
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl UploadOptions {
    /// Rejects options the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::InvalidOptions(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if self.parallel_uploads == 0 {
            return Err(UploadError::InvalidOptions(
                "parallel_uploads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Per-chunk retry policy derived from these options.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay,
        }
    }
}

/// Invoked synchronously after every chunk success.
pub type ProgressCallback = Box<dyn Fn(&ProgressSnapshot) + Send + Sync>;

/// Invoked once with the service's result after finalize succeeds.
pub type CompleteCallback = Box<dyn Fn(&FinalizeUploadResponse) + Send + Sync>;

/// Invoked for session-level failures. Never invoked for aborts.
pub type ErrorCallback = Box<dyn Fn(&UploadError) + Send + Sync>;

/// Caller-supplied callbacks. All are optional.
#[derive(Default)]
pub struct UploadHooks {
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompleteCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl UploadHooks {
    pub fn on_progress(mut self, f: impl Fn(&ProgressSnapshot) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_complete(
        mut self,
        f: impl Fn(&FinalizeUploadResponse) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&UploadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub(crate) fn progress(&self, snapshot: &ProgressSnapshot) {
        if let Some(cb) = &self.on_progress {
            cb(snapshot);
        }
    }

    pub(crate) fn complete(&self, result: &FinalizeUploadResponse) {
        if let Some(cb) = &self.on_complete {
            cb(result);
        }
    }

    pub(crate) fn error(&self, err: &UploadError) {
        if let Some(cb) = &self.on_error {
            cb(err);
        }
    }
}

impl std::fmt::Debug for UploadHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadHooks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
