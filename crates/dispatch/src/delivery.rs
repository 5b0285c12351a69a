//! Ordered result delivery back to requesters.
//!
//! Completed jobs become [`DeliveryItem`]s on a single FIFO drained by a
//! lazily started worker. The drain loop enforces chained-batch order
//! (an item waits until its predecessor's result has gone out), runs the
//! actual sink call concurrently per item, and retries transient failures
//! with a queue-wide backoff. An item that exhausts its attempts is
//! force-marked delivered and dropped so it can never wedge a chain.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use easel_core::Job;
use easel_endpoint::{Attachment, InvokeResult};

use crate::config::DispatchConfig;

/// Generic user-facing text for a permanently failed job.
pub(crate) const GENERIC_FAILURE_TEXT: &str = "Something went wrong.";

// ---------------------------------------------------------------------------
// DeliveryItem
// ---------------------------------------------------------------------------

/// A completed job's result (or failure notice) awaiting transmission.
#[derive(Debug)]
pub struct DeliveryItem {
    pub job: Job,
    /// Text shown to the requester.
    pub content: String,
    pub attachments: Vec<Attachment>,
    /// Whether the message should only be visible to the requester.
    pub ephemeral: bool,
    /// Times this item has been handed to the sink.
    attempts: AtomicU32,
    /// Set while a sink call for this item is running.
    in_flight: AtomicBool,
}

impl DeliveryItem {
    /// Wrap a successful invocation result.
    pub fn result(job: Job, result: InvokeResult) -> Self {
        Self {
            job,
            content: result.content,
            attachments: result.attachments,
            ephemeral: false,
            attempts: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    /// A text-only notice, shown only to the requester.
    pub fn notice(job: Job, content: impl Into<String>) -> Self {
        Self {
            job,
            content: content.into(),
            attachments: Vec::new(),
            ephemeral: true,
            attempts: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn set_in_flight(&self, value: bool) {
        self.in_flight.store(value, Ordering::Release);
    }

    /// Whether the predecessor's result (if any) has been delivered.
    fn predecessor_done(&self) -> bool {
        self.job
            .predecessor
            .as_ref()
            .map_or(true, |flag| flag.is_set())
    }
}

// ---------------------------------------------------------------------------
// DeliverySink
// ---------------------------------------------------------------------------

/// Collaborator that performs the actual transmission (e.g. posting a
/// message with attachments). Implemented by the embedding application.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError>;
}

/// Errors a sink may report.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Network-level failure; the queue backs off and retries the item.
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Anything else; the item is dropped after marking its job delivered.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

// ---------------------------------------------------------------------------
// DeliveryQueue
// ---------------------------------------------------------------------------

/// FIFO of pending delivery items plus the drain worker around it.
pub struct DeliveryQueue {
    sink: Arc<dyn DeliverySink>,
    config: DispatchConfig,
    state: Mutex<DeliveryState>,
    wake: Notify,
    cancel: CancellationToken,
    /// Number of transient-failure backoffs currently in progress. While
    /// non-zero the whole queue pauses, not just the failing item.
    backoffs: AtomicU32,
    /// Back-reference to our own `Arc`, for spawning worker tasks.
    weak: Weak<DeliveryQueue>,
}

#[derive(Default)]
struct DeliveryState {
    queue: VecDeque<Arc<DeliveryItem>>,
    worker_alive: bool,
}

/// Outcome of one drain step.
enum DrainStep {
    /// An item was handled; scan again from the head.
    Progress,
    /// Items exist but every one is blocked; wait before rescanning.
    Blocked,
    /// The queue is empty; the worker exits.
    Drained,
}

impl DeliveryQueue {
    pub fn new(sink: Arc<dyn DeliverySink>, config: DispatchConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            sink,
            config,
            state: Mutex::new(DeliveryState::default()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            backoffs: AtomicU32::new(0),
            weak: weak.clone(),
        })
    }

    /// Append an item and make sure the drain worker is running.
    pub async fn enqueue(&self, item: DeliveryItem) {
        let mut state = self.state.lock().await;
        state.queue.push_back(Arc::new(item));
        if !state.worker_alive {
            if let Some(this) = self.weak.upgrade() {
                state.worker_alive = true;
                tokio::spawn(this.run_worker());
            }
        }
        drop(state);
        self.wake.notify_one();
    }

    /// Number of items still queued (including in-flight ones).
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop the drain worker. Pending items stay queued but are no longer
    /// processed.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.wake.notify_waiters();
    }

    // ---- drain loop ----

    async fn run_worker(self: Arc<Self>) {
        tracing::debug!("Delivery worker started");
        loop {
            if self.cancel.is_cancelled() {
                self.state.lock().await.worker_alive = false;
                return;
            }
            match self.drain_step().await {
                DrainStep::Progress => continue,
                DrainStep::Drained => return,
                DrainStep::Blocked => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.config.scan_backoff) => {}
                    }
                }
            }
        }
    }

    /// Scan for the first deliverable item and hand it to the sink.
    async fn drain_step(&self) -> DrainStep {
        let mut state = self.state.lock().await;
        if state.queue.is_empty() {
            state.worker_alive = false;
            return DrainStep::Drained;
        }
        if self.backoffs.load(Ordering::Acquire) > 0 {
            return DrainStep::Blocked;
        }

        let position = state
            .queue
            .iter()
            .position(|item| !item.is_in_flight() && item.predecessor_done());
        let Some(position) = position else {
            return DrainStep::Blocked;
        };

        let item = Arc::clone(&state.queue[position]);
        let attempts = item.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempts > self.config.max_delivery_attempts {
            // Swallow the failure and unblock any chained successors.
            item.job.delivered.set();
            state.queue.remove(position);
            drop(state);
            tracing::warn!(
                job_id = %item.job.id,
                attempts,
                "Delivery attempts exhausted, dropping item",
            );
            self.wake.notify_one();
            return DrainStep::Progress;
        }

        item.set_in_flight(true);
        drop(state);
        if let Some(this) = self.weak.upgrade() {
            tokio::spawn(this.run_delivery(item));
        }
        DrainStep::Progress
    }

    /// One sink call, running concurrently with the drain loop.
    async fn run_delivery(self: Arc<Self>, item: Arc<DeliveryItem>) {
        match self.sink.deliver(&item).await {
            Ok(()) => {
                item.job.delivered.set();
                self.remove(&item).await;
                tracing::debug!(job_id = %item.job.id, "Result delivered");
            }
            Err(DeliveryError::Transient(reason)) => {
                tracing::warn!(
                    job_id = %item.job.id,
                    %reason,
                    "Transient delivery failure, backing off",
                );
                self.backoffs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.config.delivery_backoff).await;
                self.backoffs.fetch_sub(1, Ordering::SeqCst);
                item.set_in_flight(false);
                self.wake.notify_one();
            }
            Err(DeliveryError::Permanent(reason)) => {
                tracing::error!(
                    job_id = %item.job.id,
                    %reason,
                    "Delivery failed, dropping item",
                );
                item.job.delivered.set();
                self.remove(&item).await;
            }
        }
    }

    async fn remove(&self, item: &Arc<DeliveryItem>) {
        let mut state = self.state.lock().await;
        state.queue.retain(|queued| !Arc::ptr_eq(queued, item));
        drop(state);
        // Successors chained behind this item may now be deliverable.
        self.wake.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
