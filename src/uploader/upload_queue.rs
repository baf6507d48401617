//! Upload admission: bounded concurrency, coalescing of identical in-flight
//! uploads and a short-lived cache of recent successes.
//!
//! ```text
//! enqueue(file) ──► in flight? ──yes──► await the shared outcome
//!                       │ no
//!                       ▼
//!                 recent success? ──yes──► cached url
//!                       │ no
//!                       ▼
//!                 slot free? ──yes──► spawn job (active += 1)
//!                       │ no
//!                       ▼
//!                 pending FIFO ──(slot freed)──► spawn job proceeds
//! ```
//!
//! Every job settles through [`SettleGuard`], which releases its slot,
//! clears the in-flight entry and wakes the next pending job on every exit
//! path.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::file::{FileIdentity, UploadFile};
use super::retry::RetryPolicy;
use super::transport::{HttpTransport, UploadTransport};
use super::upload_client::{UploadClient, UploadTarget};
use crate::config::Config;
use crate::errors::{AppResult, UploadError, UploadResult};
use crate::security::InputValidator;

pub const DEFAULT_ENDPOINT: &str = "/api/upload/image";
pub const DEFAULT_FIELD_NAME: &str = "image";
pub const DEFAULT_CONCURRENCY: usize = 1;
pub const DEFAULT_DEDUPE_WINDOW: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum uploads in flight at once; 0 is treated as 1.
    pub concurrency: usize,
    pub dedupe_window: Duration,
    pub endpoint: String,
    pub field_name: String,
    pub retry: RetryPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            dedupe_window: DEFAULT_DEDUPE_WINDOW,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            field_name: DEFAULT_FIELD_NAME.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-call overrides. Unset fields fall back to the queue's configuration.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub endpoint: Option<String>,
    pub field_name: Option<String>,
    pub max_retries: Option<u32>,
    pub cancel: Option<CancellationToken>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueSnapshot {
    pub active: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub cached: usize,
}

type SharedUpload = Shared<BoxFuture<'static, UploadResult>>;

struct InFlightEntry {
    result: SharedUpload,
    started_at: Instant,
}

struct RecentSuccess {
    url: String,
    completed_at: Instant,
}

#[derive(Default)]
struct QueueState {
    active: usize,
    pending: VecDeque<oneshot::Sender<()>>,
    in_flight: HashMap<FileIdentity, InFlightEntry>,
    recent: HashMap<FileIdentity, RecentSuccess>,
}

impl QueueState {
    /// Cached URL if the last success is still inside the window. Stale
    /// entries are dropped when found.
    fn cached_url(&mut self, identity: &FileIdentity, window: Duration) -> Option<String> {
        let entry = self.recent.get(identity)?;
        if entry.completed_at.elapsed() <= window {
            return Some(entry.url.clone());
        }
        self.recent.remove(identity);
        None
    }

    /// Hand free slots to pending jobs in FIFO order. Jobs that gave up
    /// while waiting have dropped their receiver and are skipped.
    fn admit_pending(&mut self, concurrency: usize) {
        while self.active < concurrency {
            let Some(slot) = self.pending.pop_front() else {
                break;
            };
            if slot.send(()).is_ok() {
                self.active += 1;
            }
        }
    }
}

enum Admission {
    Ready,
    Queued(oneshot::Receiver<()>),
}

struct QueueInner<T> {
    client: UploadClient<T>,
    config: QueueConfig,
    state: Mutex<QueueState>,
}

impl<T> QueueInner<T> {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("Upload queue lock was poisoned, continuing with existing state");
            poisoned.into_inner()
        })
    }
}

impl<T: UploadTransport> QueueInner<T> {
    async fn run_job(
        self: Arc<Self>,
        identity: FileIdentity,
        file: UploadFile,
        target: UploadTarget,
        cancel: CancellationToken,
        admission: Admission,
    ) -> UploadResult {
        let mut settle = SettleGuard {
            inner: self.as_ref(),
            identity,
            holds_slot: false,
            url: None,
        };

        match admission {
            Admission::Ready => settle.holds_slot = true,
            Admission::Queued(mut slot) => {
                tokio::select! {
                    biased;
                    granted = &mut slot => match granted {
                        Ok(()) => settle.holds_slot = true,
                        Err(_) => {
                            return Err(UploadError::Internal(
                                "Upload slot was dropped before admission".to_string(),
                            ))
                        }
                    },
                    _ = cancel.cancelled() => {
                        // A slot granted concurrently with cancellation must still be returned
                        slot.close();
                        if slot.try_recv().is_ok() {
                            settle.holds_slot = true;
                        }
                        return Err(UploadError::Cancelled);
                    }
                }
            }
        }

        log::debug!("Starting upload of {}", settle.identity);
        let result = self.client.upload(file, &target, &cancel).await;
        if let Ok(url) = &result {
            settle.url = Some(url.clone());
        }
        result
    }
}

/// Bookkeeping for a settled job, run on drop so no exit path leaks a slot.
struct SettleGuard<'a, T> {
    inner: &'a QueueInner<T>,
    identity: FileIdentity,
    holds_slot: bool,
    url: Option<String>,
}

impl<T> Drop for SettleGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.inner.state();

        state.in_flight.remove(&self.identity);
        if self.holds_slot {
            state.active = state.active.saturating_sub(1);
        }
        if let Some(url) = self.url.take() {
            state.recent.insert(
                self.identity.clone(),
                RecentSuccess {
                    url,
                    completed_at: Instant::now(),
                },
            );
        }

        state.admit_pending(self.inner.config.concurrency);
    }
}

/// Shared handle to an upload queue. Clones refer to the same queue.
pub struct UploadQueue<T = HttpTransport> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for UploadQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl UploadQueue<HttpTransport> {
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let transport = HttpTransport::new(
            config.base_url.as_deref(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        transport.check_endpoint(&config.endpoint)?;
        Ok(Self::new(transport, config.queue_config()))
    }
}

impl<T: UploadTransport> UploadQueue<T> {
    pub fn new(transport: T, mut config: QueueConfig) -> Self {
        config.concurrency = config.concurrency.max(1);

        Self {
            inner: Arc::new(QueueInner {
                client: UploadClient::new(transport, config.retry.clone()),
                config,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Upload `file` and resolve to the URL reported by the server.
    ///
    /// Concurrent calls for the same [`FileIdentity`] share one network call
    /// and observe the same outcome. A repeat within the dedupe window of a
    /// success returns the cached URL. Firing `options.cancel` rejects this
    /// call with [`UploadError::Cancelled`]; if this call started the upload,
    /// the upload itself is aborted for every caller sharing it.
    pub async fn enqueue(&self, file: UploadFile, options: UploadOptions) -> UploadResult {
        let target = self.resolve_target(&file, &options)?;
        let cancel = options.cancel.unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let identity = file.identity();
        let concurrency = self.inner.config.concurrency;

        let shared = {
            let mut state = self.inner.state();

            if let Some(entry) = state.in_flight.get(&identity) {
                log::debug!(
                    "Joining in-flight upload of {} (started {:?} ago)",
                    identity,
                    entry.started_at.elapsed()
                );
                entry.result.clone()
            } else if let Some(url) = state.cached_url(&identity, self.inner.config.dedupe_window)
            {
                log::debug!("Serving recent upload of {} from cache", identity);
                return Ok(url);
            } else {
                let admission = if state.active < concurrency {
                    state.active += 1;
                    Admission::Ready
                } else {
                    let (slot_tx, slot_rx) = oneshot::channel();
                    state.pending.push_back(slot_tx);
                    log::debug!(
                        "Queued upload of {} ({} waiting)",
                        identity,
                        state.pending.len()
                    );
                    Admission::Queued(slot_rx)
                };

                let job = tokio::spawn(Arc::clone(&self.inner).run_job(
                    identity.clone(),
                    file,
                    target,
                    cancel.clone(),
                    admission,
                ));

                let result: SharedUpload = async move {
                    job.await.unwrap_or_else(|e| {
                        Err(UploadError::Internal(format!("Upload task failed: {}", e)))
                    })
                }
                .boxed()
                .shared();

                state.in_flight.insert(
                    identity,
                    InFlightEntry {
                        result: result.clone(),
                        started_at: Instant::now(),
                    },
                );
                result
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = shared => result,
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.inner.state();
        QueueSnapshot {
            active: state.active,
            pending: state.pending.iter().filter(|slot| !slot.is_closed()).count(),
            in_flight: state.in_flight.len(),
            cached: state.recent.len(),
        }
    }

    fn resolve_target(
        &self,
        file: &UploadFile,
        options: &UploadOptions,
    ) -> Result<UploadTarget, UploadError> {
        if file.name().trim().is_empty() {
            return Err(UploadError::validation("file", "File name cannot be empty"));
        }

        let config = &self.inner.config;
        let endpoint = options.endpoint.as_deref().unwrap_or(&config.endpoint);
        let field_name = options.field_name.as_deref().unwrap_or(&config.field_name);

        InputValidator::validate_endpoint(endpoint)?;
        InputValidator::validate_field_name(field_name)?;
        self.inner.client.transport().check_endpoint(endpoint)?;

        Ok(UploadTarget {
            endpoint: endpoint.to_string(),
            field_name: field_name.to_string(),
            max_retries: options.max_retries.unwrap_or(config.retry.max_retries),
        })
    }
}
