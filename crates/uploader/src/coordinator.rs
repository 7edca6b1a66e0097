//! Upload session coordinator.
//!
//! One [`UploadCoordinator`] drives one file through init, bounded-parallel
//! chunk transfer and finalize. Scheduling bookkeeping (queue, succeeded
//! set, progress) lives in the run loop; worker tasks only send chunks and
//! hand their result back through a `JoinSet`.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chunklift_protocol::{
    AbortUploadRequest, FinalizeUploadRequest, FinalizeUploadResponse, InitUploadRequest,
};
use chunklift_transfer::{ChunkDescriptor, ProgressSnapshot, UploadableFile, plan_chunks};
use tokio::sync::{OnceCell, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, UploadError};
use crate::retry::{ChunkContext, upload_chunk_with_retry};
use crate::transport::UploadTransport;
use crate::types::{SessionState, UploadHooks, UploadOptions};

struct SessionInner {
    state: SessionState,
    upload_id: Option<String>,
    succeeded: BTreeSet<usize>,
}

/// Coordinates a single chunked upload session.
///
/// `start()` and `resume()` run the session to completion on the calling
/// task. `abort()` may be called concurrently from any other task; the
/// coordinator is `Send + Sync` and is usually shared through an `Arc`.
pub struct UploadCoordinator {
    file: Arc<UploadableFile>,
    transport: Arc<dyn UploadTransport>,
    options: UploadOptions,
    plan: Vec<ChunkDescriptor>,
    hooks: UploadHooks,
    cancel: CancellationToken,
    /// Set once the service has been told about an abort.
    abort_notice: OnceCell<()>,
    inner: Mutex<SessionInner>,
}

impl UploadCoordinator {
    /// Validates `options` and plans the chunks of `file`.
    pub fn new(
        file: UploadableFile,
        transport: Arc<dyn UploadTransport>,
        options: UploadOptions,
    ) -> Result<Self, UploadError> {
        options.validate()?;
        let plan = plan_chunks(file.size(), options.chunk_size)?;
        debug!(
            filename = file.name(),
            filesize = file.size(),
            total_chunks = plan.len(),
            "planned upload"
        );

        Ok(Self {
            file: Arc::new(file),
            transport,
            options,
            plan,
            hooks: UploadHooks::default(),
            cancel: CancellationToken::new(),
            abort_notice: OnceCell::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Created,
                upload_id: None,
                succeeded: BTreeSet::new(),
            }),
        })
    }

    /// Installs the progress/complete/error callbacks.
    pub fn with_hooks(mut self, hooks: UploadHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn file(&self) -> &UploadableFile {
        &self.file
    }

    pub fn plan(&self) -> &[ChunkDescriptor] {
        &self.plan
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// The service-assigned id, once init has succeeded.
    pub fn upload_id(&self) -> Option<String> {
        self.lock().upload_id.clone()
    }

    /// Current progress, derived from the succeeded chunk set.
    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot::compute(&self.plan, &self.lock().succeeded)
    }

    /// Runs a fresh session: init, transfer every chunk, finalize.
    ///
    /// Only valid in [`SessionState::Created`].
    pub async fn start(&self) -> Result<FinalizeUploadResponse, UploadError> {
        self.begin("start", |s| s == SessionState::Created)?;
        self.run().await
    }

    /// Continues a failed session on this instance.
    ///
    /// Reuses the upload id if init already succeeded and only sends chunks
    /// that have not succeeded yet; if every chunk is already stored this
    /// goes straight to finalize.
    pub async fn resume(&self) -> Result<FinalizeUploadResponse, UploadError> {
        self.begin("resume", |s| {
            matches!(s, SessionState::Created | SessionState::Failed)
        })?;
        self.run().await
    }

    /// Abandons the session.
    ///
    /// Stops dispatching new chunks; transfers already on the wire finish in
    /// the background and their results are discarded. The service is told
    /// at most once, and only once a session was opened; an init still in
    /// flight is awaited by the run loop and notified when it resolves. A
    /// no-op once the upload has completed or was already aborted.
    pub async fn abort(&self) {
        let previous = {
            let mut inner = self.lock();
            if inner.state.is_final() {
                return;
            }
            std::mem::replace(&mut inner.state, SessionState::Aborted)
        };
        info!(from = ?previous, "aborting upload");

        self.cancel.cancel();
        self.notify_abort().await;
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut self.lock().state, state);
        info!(from = ?previous, to = ?state, "upload state changed");
    }

    /// Checks and performs the transition into `Initializing` atomically so
    /// two concurrent callers cannot both run the session.
    fn begin(
        &self,
        operation: &'static str,
        allowed: impl Fn(SessionState) -> bool,
    ) -> Result<(), UploadError> {
        let mut inner = self.lock();
        if inner.state == SessionState::Aborted || self.cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }
        if !allowed(inner.state) {
            return Err(UploadError::InvalidState {
                operation,
                state: inner.state,
            });
        }
        let previous = std::mem::replace(&mut inner.state, SessionState::Initializing);
        drop(inner);

        info!(
            operation,
            from = ?previous,
            filename = self.file.name(),
            total_chunks = self.plan.len(),
            "upload state changed"
        );
        Ok(())
    }

    /// Moves to `state` unless an abort got there first. Returns `true` if
    /// the session was aborted.
    fn settle(&self, state: SessionState) -> bool {
        let mut inner = self.lock();
        if inner.state == SessionState::Aborted {
            return true;
        }
        inner.state = state;
        false
    }

    /// Drives the session and settles the final state and callbacks.
    async fn run(&self) -> Result<FinalizeUploadResponse, UploadError> {
        match self.drive().await {
            Ok(result) => {
                if self.settle(SessionState::Completed) {
                    self.notify_abort().await;
                    return Err(UploadError::Aborted);
                }
                info!(upload_id = ?self.upload_id(), "upload completed");
                self.hooks.complete(&result);
                Ok(result)
            }
            Err(e) if e.is_abort() || self.cancel.is_cancelled() => {
                self.lock().state = SessionState::Aborted;
                info!(upload_id = ?self.upload_id(), "upload aborted");
                self.notify_abort().await;
                Err(UploadError::Aborted)
            }
            Err(e) => {
                if self.settle(SessionState::Failed) {
                    self.notify_abort().await;
                    return Err(UploadError::Aborted);
                }
                error!(upload_id = ?self.upload_id(), error = %e, "upload failed");
                self.hooks.error(&e);
                Err(e)
            }
        }
    }

    async fn drive(&self) -> Result<FinalizeUploadResponse, UploadError> {
        let upload_id = self.ensure_initialized().await?;

        self.set_state(SessionState::Transferring);
        self.transfer(&upload_id).await?;
        if self.cancel.is_cancelled() {
            return Err(UploadError::Aborted);
        }

        self.set_state(SessionState::Finalizing);
        let req = FinalizeUploadRequest {
            upload_id: upload_id.clone(),
            filename: self.file.name().to_string(),
            total_chunks: self.plan.len(),
        };
        let transport = Arc::clone(&self.transport);
        let result = self
            .call_unless_aborted(async move { transport.finalize(req).await })
            .await?
            .map_err(UploadError::Finalization)?;

        debug!(%upload_id, "finalize accepted");
        Ok(result)
    }

    /// Returns the session's upload id, opening a session on the service
    /// only if no earlier run obtained one.
    async fn ensure_initialized(&self) -> Result<String, UploadError> {
        let existing = self.upload_id();
        if let Some(upload_id) = existing {
            debug!(%upload_id, "reusing upload session");
            return Ok(upload_id);
        }

        let req = InitUploadRequest {
            filename: self.file.name().to_string(),
            filesize: self.file.size(),
            mimetype: self.file.mime_type().to_string(),
            total_chunks: self.plan.len(),
        };
        let transport = Arc::clone(&self.transport);
        let mut handle = tokio::spawn(async move { transport.init(req).await });
        let joined = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                // The service may open the session anyway; wait for its answer
                // so the abort notice can name it.
                if let Ok(Ok(resp)) = (&mut handle).await {
                    debug!(upload_id = %resp.upload_id, "session opened after abort");
                    self.lock().upload_id = Some(resp.upload_id);
                }
                return Err(UploadError::Aborted);
            }
            joined = &mut handle => joined,
        };
        let resp = match joined {
            Ok(result) => result.map_err(UploadError::Initialization)?,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => return Err(UploadError::Aborted),
        };

        info!(upload_id = %resp.upload_id, "upload session opened");
        self.lock().upload_id = Some(resp.upload_id.clone());
        Ok(resp.upload_id)
    }

    /// Awaits a service call unless the session is aborted first.
    ///
    /// The call runs on its own task, so an abort leaves it to finish in the
    /// background instead of cutting the request off.
    async fn call_unless_aborted<T, F>(
        &self,
        call: F,
    ) -> Result<Result<T, TransportError>, UploadError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, TransportError>> + Send + 'static,
    {
        let handle = tokio::spawn(call);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UploadError::Aborted),
            joined = handle => match joined {
                Ok(result) => Ok(result),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => Err(UploadError::Aborted),
            },
        }
    }

    /// Sends every chunk not yet in the succeeded set.
    ///
    /// At most `parallel_uploads` chunks are in flight. The first chunk that
    /// exhausts its retries stops further dispatch; chunks already in flight
    /// are drained and their successes still recorded, so a later `resume()`
    /// does not resend them.
    async fn transfer(&self, upload_id: &str) -> Result<(), UploadError> {
        let mut queue: VecDeque<ChunkDescriptor> = {
            let inner = self.lock();
            self.plan
                .iter()
                .filter(|c| !inner.succeeded.contains(&c.index))
                .cloned()
                .collect()
        };
        if queue.is_empty() {
            debug!(upload_id, "all chunks already uploaded");
            return Ok(());
        }
        debug!(
            upload_id,
            pending = queue.len(),
            parallel = self.options.parallel_uploads,
            "transferring chunks"
        );

        let ctx = Arc::new(ChunkContext {
            upload_id: upload_id.to_string(),
            total_chunks: self.plan.len(),
            filename: self.file.name().to_string(),
        });
        let policy = self.options.retry_policy();
        let permits = Arc::new(Semaphore::new(self.options.parallel_uploads));
        let mut tasks: JoinSet<Result<ChunkDescriptor, UploadError>> = JoinSet::new();
        let mut failure: Option<UploadError> = None;

        loop {
            if self.cancel.is_cancelled() {
                tasks.detach_all();
                return Err(UploadError::Aborted);
            }

            while failure.is_none() && !queue.is_empty() {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    break;
                };
                let Some(chunk) = queue.pop_front() else {
                    break;
                };

                let transport = Arc::clone(&self.transport);
                let file = Arc::clone(&self.file);
                let ctx = Arc::clone(&ctx);
                let cancel = self.cancel.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    upload_chunk_with_retry(transport.as_ref(), &file, chunk, &ctx, policy, &cancel)
                        .await
                });
            }

            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tasks.detach_all();
                    return Err(UploadError::Aborted);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(Ok(chunk)) => self.record_success(&chunk),
                // The next iteration observes the cancellation.
                Ok(Err(UploadError::Aborted)) => {}
                Ok(Err(e)) => {
                    if failure.is_none() {
                        error!(upload_id, error = %e, "chunk failed, stopping dispatch");
                        failure = Some(e);
                    } else {
                        warn!(upload_id, error = %e, "another chunk failed while draining");
                    }
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {
                    tasks.detach_all();
                    return Err(UploadError::Aborted);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn record_success(&self, chunk: &ChunkDescriptor) {
        let snapshot = {
            let mut inner = self.lock();
            inner.succeeded.insert(chunk.index);
            ProgressSnapshot::compute(&self.plan, &inner.succeeded)
        };
        debug!(
            chunk = chunk.index,
            retries = chunk.retry_count,
            uploaded_chunks = snapshot.uploaded_chunks,
            total_chunks = snapshot.total_chunks,
            percentage = snapshot.percentage,
            "progress"
        );
        self.hooks.progress(&snapshot);
    }

    /// Best-effort abort notification, sent at most once per session.
    ///
    /// Every caller waits for the one request in flight, so `start()` and
    /// `resume()` never return `Aborted` before the service was told.
    async fn notify_abort(&self) {
        let Some(upload_id) = self.upload_id() else {
            return;
        };

        self.abort_notice
            .get_or_init(|| async {
                let req = AbortUploadRequest {
                    upload_id: upload_id.clone(),
                };
                match self.transport.abort(req).await {
                    Ok(()) => info!(%upload_id, "service notified of abort"),
                    Err(e) => warn!(%upload_id, error = %e, "abort notification failed"),
                }
            })
            .await;
    }
}
