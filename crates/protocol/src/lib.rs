//! Wire types for the chunked upload service.
//!
//! Every session goes through four endpoints relative to a single
//! upload URL: `init`, `chunk` (multipart), `finalize` and `abort`.
//! JSON payloads use the service's field names (`uploadId`,
//! `totalChunks`, ...), so the structs here carry explicit serde renames.

pub mod constants;
pub mod messages;

pub use messages::{
    AbortUploadRequest, FinalizeUploadRequest, FinalizeUploadResponse, InitUploadRequest,
    InitUploadResponse,
};
