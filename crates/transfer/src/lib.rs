//! Chunk planning and progress accounting for large-file uploads.
//!
//! A file is split into fixed-size, contiguous byte ranges
//! ([`ChunkDescriptor`]) by [`plan_chunks`]. Progress is always derived
//! from the set of finished chunk indices, never accumulated, so replayed
//! or out-of-order completions cannot skew the totals.

mod chunked;
mod file;
mod progress;

pub use chunked::{ChunkDescriptor, needs_chunk_upload, plan_chunks, total_chunks};
pub use file::{UploadableFile, detect_mime_type};
pub use progress::{ProgressSnapshot, SpeedCalculator};

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Files at or below this size (in MiB) do not need chunked transfer.
pub const DEFAULT_THRESHOLD_MB: u64 = 50;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,

    #[error("byte range {start}..{end} is outside a {size}-byte file")]
    OutOfRange { start: u64, end: u64, size: u64 },
}
