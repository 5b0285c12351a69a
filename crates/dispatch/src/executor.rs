//! Per-endpoint pipelined executor.
//!
//! Each [`EndpointExecutor`] owns one endpoint's FIFO and drains it with a
//! lazily started worker. The worker waits only for the invocation's early
//! acceptance signal before taking the next FIFO item, so one job's slow
//! generation overlaps with the submission of the next — a two-deep
//! pipeline by default. Failures before acceptance send the job back to
//! the router at top priority; failures after acceptance surface through
//! the delivery queue only.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use easel_core::{cost, Capability, Job, JobId, JobKind, UserId};
use easel_endpoint::{AcceptedSignal, Backoff, EndpointClient, EndpointProfile, InvokeError};

use crate::delivery::{DeliveryItem, DeliveryQueue, GENERIC_FAILURE_TEXT};
use crate::fleet::Fleet;
use crate::router::Router;

/// Executor for a single endpoint: FIFO, in-flight bookkeeping, and the
/// dispatch worker around them.
pub struct EndpointExecutor {
    profile: EndpointProfile,
    client: Arc<dyn EndpointClient>,
    /// Fleet slot of the endpoint that must be idle before this one runs,
    /// resolved from the profile's `depends_on` name at fleet build time.
    depends_on: Option<usize>,
    router: Weak<Router>,
    delivery: Arc<DeliveryQueue>,
    cancel: CancellationToken,
    state: Mutex<ExecutorState>,
    backoff: Mutex<Backoff>,
    /// Back-reference to our own `Arc`, for spawning the worker task.
    weak: Weak<EndpointExecutor>,
}

#[derive(Default)]
struct ExecutorState {
    fifo: VecDeque<Job>,
    in_flight: Vec<InFlight>,
    /// Model last requested on this endpoint; the router reads it for
    /// affinity. This executor is the only writer.
    warm_model: Option<String>,
    worker_alive: bool,
}

/// Bookkeeping for a job that has left the FIFO but not yet finished.
struct InFlight {
    id: JobId,
    user: UserId,
    cost: f64,
}

impl EndpointExecutor {
    pub(crate) fn new(
        profile: EndpointProfile,
        client: Arc<dyn EndpointClient>,
        depends_on: Option<usize>,
        router: Weak<Router>,
        delivery: Arc<DeliveryQueue>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            profile,
            client,
            depends_on,
            router,
            delivery,
            cancel,
            state: Mutex::new(ExecutorState::default()),
            backoff: Mutex::new(Backoff::default()),
            weak: weak.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    // ---- dispatch interface (called by the router) ----

    /// Whether this endpoint can serve `kind` at all: online, the variant
    /// capability present and not disabled by configuration, and every
    /// model or upscaler the job names installed.
    pub fn is_valid(&self, kind: &JobKind) -> bool {
        if !self.client.is_online() {
            return false;
        }

        let required = Capability::required_for(kind);
        let capabilities = self.client.capabilities();
        if !capabilities.contains(required) || self.profile.is_disabled(required) {
            return false;
        }

        match kind {
            JobKind::Draw(params) => {
                if params.control_net
                    && (!capabilities.contains(Capability::ControlNet)
                        || self.profile.is_disabled(Capability::ControlNet))
                {
                    return false;
                }
                match &params.model {
                    Some(model) => self.client.available_models().contains(model),
                    None => true,
                }
            }
            JobKind::Upscale(params) => {
                let available = self.client.available_upscalers();
                params
                    .upscalers
                    .iter()
                    .all(|upscaler| available.contains(upscaler))
            }
            JobKind::Identify(_) => true,
        }
    }

    /// Whether this endpoint can take another job right now: fewer than
    /// `limit` jobs held, and the dependency endpoint (if any) fully idle.
    pub async fn is_ready(&self, limit: usize, fleet: &Fleet) -> bool {
        if self.queue_len().await >= limit {
            return false;
        }
        if let Some(index) = self.depends_on {
            if let Some(dependency) = fleet.get(index) {
                if !dependency.is_idle().await {
                    return false;
                }
            }
        }
        true
    }

    /// Append a job and make sure the worker is running.
    pub async fn enqueue(&self, job: Job) {
        let mut state = self.state.lock().await;
        if let Some(model) = job.kind.requested_model() {
            state.warm_model = Some(model.to_string());
        }
        state.fifo.push_back(job);
        if !state.worker_alive {
            if let Some(this) = self.weak.upgrade() {
                state.worker_alive = true;
                tokio::spawn(this.run_worker());
            }
        }
    }

    // ---- read aggregates ----

    /// Queued plus in-flight job count.
    pub async fn queue_len(&self) -> usize {
        let state = self.state.lock().await;
        state.fifo.len() + state.in_flight.len()
    }

    /// No queued work and nothing in flight.
    pub async fn is_idle(&self) -> bool {
        self.queue_len().await == 0
    }

    /// Model currently warm on the endpoint, as last requested through it.
    pub async fn warm_model(&self) -> Option<String> {
        self.state.lock().await.warm_model.clone()
    }

    /// Estimated cost of everything queued and in flight, all users.
    pub async fn queued_cost(&self) -> f64 {
        let state = self.state.lock().await;
        let queued: f64 = state.fifo.iter().map(|job| cost::estimate(&job.kind)).sum();
        let executing: f64 = state.in_flight.iter().map(|entry| entry.cost).sum();
        queued + executing
    }

    /// Estimated cost of one user's queued and in-flight jobs.
    pub async fn user_cost(&self, user: UserId) -> f64 {
        let state = self.state.lock().await;
        let queued: f64 = state
            .fifo
            .iter()
            .filter(|job| job.user == user)
            .map(|job| cost::estimate(&job.kind))
            .sum();
        let executing: f64 = state
            .in_flight
            .iter()
            .filter(|entry| entry.user == user)
            .map(|entry| entry.cost)
            .sum();
        queued + executing
    }

    /// Remove a user's not-yet-started jobs from the FIFO. In-flight jobs
    /// are not interrupted.
    pub async fn cancel_user(&self, user: UserId) -> usize {
        let mut state = self.state.lock().await;
        let before = state.fifo.len();
        state.fifo.retain(|job| job.user != user);
        before - state.fifo.len()
    }

    // ---- worker ----

    // Returns an explicitly boxed future (rather than `async fn`) to break
    // the compiler's recursive opaque-type resolution across the
    // enqueue -> run_worker -> run_invocation -> router -> run_scan ->
    // enqueue call cycle.
    fn run_worker(
        self: Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
        Box::pin(async move {
            tracing::debug!(endpoint = %self.profile.name, "Endpoint worker started");
            loop {
                if self.cancel.is_cancelled() {
                    self.state.lock().await.worker_alive = false;
                    return;
                }

                let job = {
                    let mut state = self.state.lock().await;
                    match state.fifo.pop_front() {
                        Some(job) => {
                            state.in_flight.push(InFlight {
                                id: job.id,
                                user: job.user,
                                cost: cost::estimate(&job.kind),
                            });
                            job
                        }
                        None => {
                            state.worker_alive = false;
                            return;
                        }
                    }
                };

                let (accepted, accepted_rx) = AcceptedSignal::new();
                tracing::info!(
                    endpoint = %self.profile.name,
                    job_id = %job.id,
                    kind = job.kind.label(),
                    "Job started",
                );
                tokio::spawn(Arc::clone(&self).run_invocation(job, accepted));

                // Wait for acceptance only; the slow generation and result
                // fetch overlap with the next FIFO item. An Err here means the
                // signal was dropped unfired and the invocation task is
                // already requeueing the job.
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        self.state.lock().await.worker_alive = false;
                        return;
                    }
                    _ = accepted_rx => {}
                }
            }
        })
    }

    /// Drive one remote invocation to completion in the background.
    async fn run_invocation(self: Arc<Self>, job: Job, accepted: AcceptedSignal) {
        let outcome = self.client.invoke(&job, accepted).await;
        self.finish(job.id).await;

        match outcome {
            Ok(result) => {
                self.backoff.lock().await.reset();
                tracing::info!(
                    endpoint = %self.profile.name,
                    job_id = %job.id,
                    "Job completed",
                );
                self.delivery
                    .enqueue(DeliveryItem::result(job, result))
                    .await;
            }
            Err(InvokeError::Unavailable(reason)) => {
                tracing::warn!(
                    endpoint = %self.profile.name,
                    job_id = %job.id,
                    %reason,
                    "Endpoint unavailable, requeueing job",
                );
                let delay = self.backoff.lock().await.next();
                tokio::time::sleep(delay).await;
                self.client.reconnect().await;
                if self.cancel.is_cancelled() {
                    return;
                }
                if let Some(router) = self.router.upgrade() {
                    router.requeue(job).await;
                }
            }
            Err(InvokeError::Remote(reason)) => {
                tracing::error!(
                    endpoint = %self.profile.name,
                    job_id = %job.id,
                    %reason,
                    "Remote invocation failed",
                );
                self.delivery
                    .enqueue(DeliveryItem::notice(job, GENERIC_FAILURE_TEXT))
                    .await;
            }
        }
    }

    /// Drop the in-flight entry for a finished invocation and let the
    /// router know a pipeline slot freed up.
    async fn finish(&self, id: JobId) {
        let mut state = self.state.lock().await;
        state.in_flight.retain(|entry| entry.id != id);
        drop(state);
        if let Some(router) = self.router.upgrade() {
            router.wake();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
