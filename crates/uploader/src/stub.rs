//! In-memory upload service used by the coordinator and retry tests.
//!
//! Stores chunks per `(upload_id, chunk_index)` slot, assembles them by
//! index on finalize and records every call so tests can assert on the
//! traffic the coordinator produced.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chunklift_protocol::{
    AbortUploadRequest, FinalizeUploadRequest, FinalizeUploadResponse, InitUploadRequest,
    InitUploadResponse,
};

use crate::error::TransportError;
use crate::transport::{ChunkPayload, TransportFuture, UploadTransport};

#[derive(Default)]
struct Session {
    total_chunks: usize,
    slots: BTreeMap<usize, Vec<u8>>,
}

#[derive(Default)]
struct StubState {
    next_id: u64,
    sessions: HashMap<String, Session>,
    fail_before_store: HashMap<usize, u32>,
    fail_after_store: HashMap<usize, u32>,
    fail_init: u32,
    fail_finalize: u32,
    init_calls: usize,
    finalize_calls: usize,
    chunk_calls: HashMap<usize, usize>,
    abort_requests: Vec<String>,
    assembled: Option<Vec<u8>>,
}

pub(crate) struct StubService {
    state: Mutex<StubState>,
    chunk_delay: Duration,
    init_delay: Duration,
    abort_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter even if the call is dropped mid-way.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "service unavailable".into(),
    }
}

impl StubService {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState::default()),
            chunk_delay: Duration::ZERO,
            init_delay: Duration::ZERO,
            abort_delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every chunk call takes `delay` before it is answered.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// `init` takes `delay` before it opens the session.
    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    /// `abort` takes `delay` before it is recorded.
    pub fn with_abort_delay(mut self, delay: Duration) -> Self {
        self.abort_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a session directly, bypassing `init`.
    pub fn open_session(&self, total_chunks: usize) -> String {
        self.lock().open(total_chunks)
    }

    /// The next `times` calls for chunk `index` fail before storing anything.
    pub fn fail_chunk(&self, index: usize, times: u32) {
        self.lock().fail_before_store.insert(index, times);
    }

    /// The next `times` calls for chunk `index` store the bytes, then fail.
    pub fn fail_chunk_after_store(&self, index: usize, times: u32) {
        self.lock().fail_after_store.insert(index, times);
    }

    pub fn fail_init(&self, times: u32) {
        self.lock().fail_init = times;
    }

    pub fn fail_finalize(&self, times: u32) {
        self.lock().fail_finalize = times;
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_before_store.clear();
        state.fail_after_store.clear();
        state.fail_init = 0;
        state.fail_finalize = 0;
    }

    pub fn init_calls(&self) -> usize {
        self.lock().init_calls
    }

    pub fn finalize_calls(&self) -> usize {
        self.lock().finalize_calls
    }

    pub fn chunk_calls(&self) -> usize {
        self.lock().chunk_calls.values().sum()
    }

    pub fn chunk_calls_for(&self, index: usize) -> usize {
        self.lock().chunk_calls.get(&index).copied().unwrap_or(0)
    }

    pub fn abort_requests(&self) -> Vec<String> {
        self.lock().abort_requests.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn stored_chunk(&self, upload_id: &str, index: usize) -> Option<Vec<u8>> {
        self.lock()
            .sessions
            .get(upload_id)
            .and_then(|s| s.slots.get(&index).cloned())
    }

    pub fn slot_count(&self, upload_id: &str) -> usize {
        self.lock()
            .sessions
            .get(upload_id)
            .map_or(0, |s| s.slots.len())
    }

    /// Bytes of the most recently finalized object.
    pub fn assembled(&self) -> Option<Vec<u8>> {
        self.lock().assembled.clone()
    }

    fn take_failure(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

impl StubState {
    fn open(&mut self, total_chunks: usize) -> String {
        self.next_id += 1;
        let upload_id = format!("stub-{}", self.next_id);
        self.sessions.insert(
            upload_id.clone(),
            Session {
                total_chunks,
                slots: BTreeMap::new(),
            },
        );
        upload_id
    }
}

impl UploadTransport for StubService {
    fn init(&self, req: InitUploadRequest) -> TransportFuture<'_, InitUploadResponse> {
        Box::pin(async move {
            if !self.init_delay.is_zero() {
                tokio::time::sleep(self.init_delay).await;
            }
            let mut state = self.lock();
            state.init_calls += 1;
            if Self::take_failure(&mut state.fail_init) {
                return Err(unavailable());
            }
            let upload_id = state.open(req.total_chunks);
            Ok(InitUploadResponse { upload_id })
        })
    }

    fn upload_chunk(&self, chunk: ChunkPayload) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let fail_before = {
                let mut state = self.lock();
                *state.chunk_calls.entry(chunk.chunk_index).or_default() += 1;
                let counter = state
                    .fail_before_store
                    .entry(chunk.chunk_index)
                    .or_default();
                Self::take_failure(counter)
            };

            if !self.chunk_delay.is_zero() {
                tokio::time::sleep(self.chunk_delay).await;
            }
            if fail_before {
                return Err(unavailable());
            }

            let mut state = self.lock();
            let session = state
                .sessions
                .get_mut(&chunk.upload_id)
                .ok_or_else(|| TransportError::Status {
                    status: 404,
                    body: format!("unknown upload {}", chunk.upload_id),
                })?;
            if chunk.chunk_index >= session.total_chunks {
                return Err(TransportError::Status {
                    status: 400,
                    body: format!("chunk index {} out of range", chunk.chunk_index),
                });
            }
            // Re-delivery overwrites the same slot.
            session.slots.insert(chunk.chunk_index, chunk.data.to_vec());

            let counter = state.fail_after_store.entry(chunk.chunk_index).or_default();
            if Self::take_failure(counter) {
                return Err(TransportError::Status {
                    status: 500,
                    body: "stored but response lost".into(),
                });
            }
            Ok(())
        })
    }

    fn finalize(&self, req: FinalizeUploadRequest) -> TransportFuture<'_, FinalizeUploadResponse> {
        Box::pin(async move {
            let mut state = self.lock();
            state.finalize_calls += 1;
            if Self::take_failure(&mut state.fail_finalize) {
                return Err(unavailable());
            }

            let session = state
                .sessions
                .get(&req.upload_id)
                .ok_or_else(|| TransportError::Status {
                    status: 404,
                    body: format!("unknown upload {}", req.upload_id),
                })?;
            if req.total_chunks != session.total_chunks
                || (0..session.total_chunks).any(|i| !session.slots.contains_key(&i))
            {
                return Err(TransportError::Status {
                    status: 409,
                    body: "missing chunks".into(),
                });
            }

            let assembled: Vec<u8> = session.slots.values().flatten().copied().collect();
            let size = assembled.len();
            state.assembled = Some(assembled);

            Ok(FinalizeUploadResponse(serde_json::json!({
                "uploadId": req.upload_id,
                "filename": req.filename,
                "size": size,
            })))
        })
    }

    fn abort(&self, req: AbortUploadRequest) -> TransportFuture<'_, ()> {
        Box::pin(async move {
            if !self.abort_delay.is_zero() {
                tokio::time::sleep(self.abort_delay).await;
            }
            let mut state = self.lock();
            state.sessions.remove(&req.upload_id);
            state.abort_requests.push(req.upload_id);
            Ok(())
        })
    }
}
