//! Upload service transport.
//!
//! `UploadTransport` is the seam between the coordinator and the network.
//! [`HttpTransport`] talks to the real service with `reqwest`; tests drive
//! the coordinator through in-memory implementations.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chunklift_protocol::constants::{
    ABORT_PATH, CHUNK_CONTENT_TYPE, CHUNK_PATH, FIELD_CHUNK_INDEX, FIELD_FILE, FIELD_TOTAL_CHUNKS,
    FIELD_UPLOAD_ID, FINALIZE_PATH, INIT_PATH,
};
use chunklift_protocol::{
    AbortUploadRequest, FinalizeUploadRequest, FinalizeUploadResponse, InitUploadRequest,
    InitUploadResponse,
};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::trace;

use crate::credentials::CredentialProvider;
use crate::error::TransportError;

/// Boxed future returned by [`UploadTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// One chunk, ready to send.
#[derive(Debug, Clone)]
pub struct ChunkPayload {
    pub upload_id: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub filename: String,
    /// Cheap to clone; retries resend the same buffer.
    pub data: Bytes,
}

/// Abstract connection to the upload service.
///
/// Implementations perform exactly one request per call; retrying is the
/// caller's job. `upload_chunk` must be safe to repeat for the same
/// `(upload_id, chunk_index)`.
pub trait UploadTransport: Send + Sync {
    /// Opens a session and returns its upload id.
    fn init(&self, req: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse>;

    /// Sends one chunk.
    fn upload_chunk(&self, chunk: ChunkPayload) -> TransportFuture<'_, ()>;

    /// Asks the service to assemble the received chunks.
    fn finalize(&self, req: FinalizeUploadRequest) -> TransportFuture<'_, FinalizeUploadResponse>;

    /// Notifies the service that the session is abandoned.
    fn abort(&self, req: AbortUploadRequest) -> TransportFuture<'_, ()>;
}

/// `reqwest`-backed transport for the four service endpoints.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpTransport {
    /// Creates a transport for `base_url` (the `{uploadUrl}` prefix).
    ///
    /// `timeout` bounds each individual request; `None` leaves it to the
    /// client defaults (no timeout).
    pub fn new(
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self::with_client(builder.build()?, base_url, credentials))
    }

    /// Creates a transport around an existing client.
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            credentials,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Sends an authenticated request and returns the body of a 2xx response.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Bytes, TransportError> {
        let token = self.credentials.bearer_token()?;
        let resp = req.bearer_auth(token).send().await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.bytes().await?)
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<Bytes, TransportError> {
        let url = self.endpoint(path);
        trace!(%url, "POST");
        self.send(self.http.post(url).json(body)).await
    }
}

impl UploadTransport for HttpTransport {
    fn init(&self, req: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse> {
        Box::pin(async move {
            let body = self.post_json(INIT_PATH, &req).await?;
            let resp: InitUploadResponse = serde_json::from_slice(&body)?;
            if resp.upload_id.is_empty() {
                return Err(TransportError::InvalidResponse("empty uploadId".into()));
            }
            Ok(resp)
        })
    }

    fn upload_chunk(&self, chunk: ChunkPayload) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let len = chunk.data.len() as u64;
            let part = Part::stream_with_length(chunk.data, len)
                .file_name(chunk.filename)
                .mime_str(CHUNK_CONTENT_TYPE)?;
            let form = Form::new()
                .part(FIELD_FILE, part)
                .text(FIELD_UPLOAD_ID, chunk.upload_id)
                .text(FIELD_CHUNK_INDEX, chunk.chunk_index.to_string())
                .text(FIELD_TOTAL_CHUNKS, chunk.total_chunks.to_string());

            let url = self.endpoint(CHUNK_PATH);
            trace!(%url, chunk = chunk.chunk_index, bytes = len, "POST chunk");
            self.send(self.http.post(url).multipart(form)).await?;
            Ok(())
        })
    }

    fn finalize(&self, req: FinalizeUploadRequest) -> TransportFuture<'_, FinalizeUploadResponse> {
        Box::pin(async move {
            let body = self.post_json(FINALIZE_PATH, &req).await?;
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(FinalizeUploadResponse(serde_json::Value::Null));
            }
            Ok(FinalizeUploadResponse(serde_json::from_slice(&body)?))
        })
    }

    fn abort(&self, req: AbortUploadRequest) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            self.post_json(ABORT_PATH, &req).await?;
            Ok(())
        })
    }
}
