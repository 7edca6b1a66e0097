//! Per-chunk retry with linear backoff.

use std::time::Duration;

use chunklift_transfer::{ChunkDescriptor, UploadableFile};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::UploadError;
use crate::transport::{ChunkPayload, UploadTransport};

/// How a failed chunk is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Retry `n` (1-based) waits `base_delay × n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based). Linear, no jitter.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Identifies the session a chunk belongs to.
#[derive(Debug, Clone)]
pub(crate) struct ChunkContext {
    pub upload_id: String,
    pub total_chunks: usize,
    pub filename: String,
}

/// Sends one chunk, retrying transport failures per `policy`.
///
/// The chunk's bytes are read once and reused for every attempt. Returns the
/// descriptor with `retry_count` set to the number of retries performed.
/// Stops early with [`UploadError::Aborted`] once `cancel` fires; an attempt
/// already on the wire is not interrupted.
pub(crate) async fn upload_chunk_with_retry(
    transport: &dyn UploadTransport,
    file: &UploadableFile,
    mut chunk: ChunkDescriptor,
    ctx: &ChunkContext,
    policy: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ChunkDescriptor, UploadError> {
    let data = file.read_range(chunk.byte_range()).await?;

    loop {
        if cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        let payload = ChunkPayload {
            upload_id: ctx.upload_id.clone(),
            chunk_index: chunk.index,
            total_chunks: ctx.total_chunks,
            filename: ctx.filename.clone(),
            data: data.clone(),
        };

        let err = match transport.upload_chunk(payload).await {
            Ok(()) => {
                debug!(
                    chunk = chunk.index,
                    bytes = chunk.size(),
                    retries = chunk.retry_count,
                    "chunk uploaded"
                );
                return Ok(chunk);
            }
            Err(e) => e,
        };

        if chunk.retry_count >= policy.max_retries {
            return Err(UploadError::ChunkTransport { chunk, source: err });
        }

        chunk.retry_count += 1;
        let delay = policy.delay_for_attempt(chunk.retry_count);
        warn!(
            chunk = chunk.index,
            attempt = chunk.retry_count,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "chunk upload failed, retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::stub::StubService;
    use bytes::Bytes;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn ctx(upload_id: &str, total_chunks: usize) -> ChunkContext {
        ChunkContext {
            upload_id: upload_id.into(),
            total_chunks,
            filename: "data.bin".into(),
        }
    }

    fn file(len: usize) -> UploadableFile {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        UploadableFile::from_bytes("data.bin", None, Bytes::from(data))
    }

    fn chunk(index: usize, start: u64, end: u64) -> ChunkDescriptor {
        ChunkDescriptor {
            index,
            start,
            end,
            retry_count: 0,
        }
    }

    #[test]
    fn linear_delays() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(3000));
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let stub = StubService::new();
        let upload_id = stub.open_session(4);
        stub.fail_chunk(2, 2);

        let file = file(40);
        let started = Instant::now();
        let done = upload_chunk_with_retry(
            &stub,
            &file,
            chunk(2, 20, 30),
            &ctx(&upload_id, 4),
            RetryPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(done.retry_count, 2);
        assert_eq!(stub.chunk_calls_for(2), 3);
        // 1s + 2s of backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(
            stub.stored_chunk(&upload_id, 2),
            Some((20u8..30).collect::<Vec<_>>())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let stub = StubService::new();
        let upload_id = stub.open_session(5);
        stub.fail_chunk(4, 10);

        let err = upload_chunk_with_retry(
            &stub,
            &file(50),
            chunk(4, 40, 50),
            &ctx(&upload_id, 5),
            RetryPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(stub.chunk_calls_for(4), 4);
        match err {
            UploadError::ChunkTransport { chunk, source } => {
                assert_eq!(chunk.index, 4);
                assert_eq!(chunk.retry_count, 3);
                assert!(matches!(source, TransportError::Status { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let stub = StubService::new();
        let upload_id = stub.open_session(1);
        stub.fail_chunk(0, 1);

        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(10),
        };
        let err = upload_chunk_with_retry(
            &stub,
            &file(8),
            chunk(0, 0, 8),
            &ctx(&upload_id, 1),
            policy,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(stub.chunk_calls_for(0), 1);
        assert_eq!(err.chunk().map(|c| c.retry_count), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let stub = Arc::new(StubService::new());
        let upload_id = stub.open_session(1);
        stub.fail_chunk(0, 10);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = upload_chunk_with_retry(
            stub.as_ref(),
            &file(8),
            chunk(0, 0, 8),
            &ctx(&upload_id, 1),
            RetryPolicy::default(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(err.is_abort());
        assert_eq!(stub.chunk_calls_for(0), 1);
    }

    #[tokio::test]
    async fn read_failure_is_not_retried() {
        let stub = StubService::new();
        let upload_id = stub.open_session(1);

        let err = upload_chunk_with_retry(
            &stub,
            &file(4),
            chunk(0, 0, 8),
            &ctx(&upload_id, 1),
            RetryPolicy::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, UploadError::Source(_)));
        assert_eq!(stub.chunk_calls_for(0), 0);
    }
}
