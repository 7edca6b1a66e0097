//! Upload error types.

use chunklift_transfer::{ChunkDescriptor, TransferError};

use crate::types::SessionState;

/// Errors from a credential provider.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no token stored for {0}")]
    Missing(String),
}

/// Errors from a single request to the upload service.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credentials unavailable: {0}")]
    Credentials(#[from] CredentialError),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Session-level errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload initialization failed: {0}")]
    Initialization(#[source] TransportError),

    #[error("chunk {} failed after {} attempt(s): {source}", chunk.index, chunk.retry_count + 1)]
    ChunkTransport {
        chunk: ChunkDescriptor,
        #[source]
        source: TransportError,
    },

    #[error("upload finalization failed: {0}")]
    Finalization(#[source] TransportError),

    #[error("upload aborted")]
    Aborted,

    #[error("cannot {operation} an upload in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("invalid upload options: {0}")]
    InvalidOptions(String),

    #[error("file error: {0}")]
    Source(#[from] TransferError),
}

impl UploadError {
    /// The failing chunk, for [`UploadError::ChunkTransport`].
    pub fn chunk(&self) -> Option<&ChunkDescriptor> {
        match self {
            Self::ChunkTransport { chunk, .. } => Some(chunk),
            _ => None,
        }
    }

    /// Whether this is the cooperative-abort outcome rather than a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
