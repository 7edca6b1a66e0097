use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Starts a new upload session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadRequest {
    pub filename: String,
    pub filesize: u64,
    pub mimetype: String,
    pub total_chunks: usize,
}

/// Asks the service to assemble every received chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeUploadRequest {
    pub upload_id: String,
    pub filename: String,
    pub total_chunks: usize,
}

/// Cancels an active upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortUploadRequest {
    pub upload_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Response to `init`.
///
/// Services may attach extra fields; only `uploadId` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitUploadResponse {
    pub upload_id: String,
}

/// Response to `finalize`.
///
/// The payload is opaque to the client and is handed to the caller as-is
/// (usually a reference to the assembled object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FinalizeUploadResponse(pub serde_json::Value);

impl FinalizeUploadResponse {
    /// Looks up a top-level field of the result payload.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Consumes the response, returning the raw payload.
    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}
