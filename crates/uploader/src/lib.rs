//! Reliable chunked upload of a single large file.
//!
//! The [`UploadCoordinator`] owns one upload session end to end:
//!
//! 1. **Plan** — split the file into fixed-size chunks
//! 2. **Init** — open a session on the service and obtain an upload id
//! 3. **Transfer** — send chunks under bounded concurrency, each chunk
//!    retried locally with linear backoff
//! 4. **Finalize** — ask the service to assemble the chunks
//!
//! The network side sits behind the [`UploadTransport`] trait so the
//! coordinator can be driven by [`HttpTransport`] in production and by
//! in-memory doubles in tests. Bearer tokens come from an injected
//! [`CredentialProvider`].

pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod retry;
pub mod transport;
pub mod types;

#[cfg(test)]
mod stub;

// Re-export primary types for convenience.
pub use coordinator::UploadCoordinator;
pub use credentials::{CredentialProvider, EndpointCredentials, StaticToken, TokenStore};
pub use error::{CredentialError, TransportError, UploadError};
pub use retry::RetryPolicy;
pub use transport::{ChunkPayload, HttpTransport, TransportFuture, UploadTransport};
pub use types::{
    CompleteCallback, ErrorCallback, ProgressCallback, SessionState, UploadHooks, UploadOptions,
};

pub use chunklift_protocol::FinalizeUploadResponse;
pub use chunklift_transfer::{ChunkDescriptor, ProgressSnapshot, UploadableFile};
