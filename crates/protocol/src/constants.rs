//! Endpoint paths and multipart field names.

/// Opens a session and allocates `totalChunks` slots.
pub const INIT_PATH: &str = "/init";

/// Receives one chunk as `multipart/form-data`.
pub const CHUNK_PATH: &str = "/chunk";

/// Assembles all received chunks into the final object.
pub const FINALIZE_PATH: &str = "/finalize";

/// Best-effort session cancellation.
pub const ABORT_PATH: &str = "/abort";

/// Multipart field carrying the chunk bytes.
pub const FIELD_FILE: &str = "file";
pub const FIELD_UPLOAD_ID: &str = "uploadId";
pub const FIELD_CHUNK_INDEX: &str = "chunkIndex";
pub const FIELD_TOTAL_CHUNKS: &str = "totalChunks";

/// Content type sent for the chunk part.
pub const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";
