//! Global priority router.
//!
//! The [`Router`] holds ten priority bands of pending jobs and a lazily
//! started scan worker that matches the head of the highest non-empty
//! band against the fleet. A job whose head position cannot dispatch is
//! skipped rather than blocking the band; once a full pass dispatches
//! nothing the scanner parks on a wake notification with a bounded
//! backoff sleep as fallback.
//!
//! `submit` is the single authoritative admission-control point: it
//! enforces the per-user cost ceiling, the capability pre-check, and the
//! lifetime attempt bound before a job reaches any band.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;

use easel_core::{cost, Job, JobId, JobKind, UserId};

use crate::config::DispatchConfig;
use crate::delivery::{DeliveryItem, DeliveryQueue, GENERIC_FAILURE_TEXT};
use crate::executor::EndpointExecutor;
use crate::fleet::Fleet;

/// Number of priority bands. Band 0 is served first.
pub const PRIORITY_BANDS: usize = 10;

/// User-facing text when no endpoint will ever serve a job.
const REJECTED_TEXT: &str = "Sorry, I cannot handle this request right now.";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Global dispatcher over priority bands and the endpoint fleet.
pub struct Router {
    config: DispatchConfig,
    delivery: Arc<DeliveryQueue>,
    bands: Mutex<Bands>,
    fleet: RwLock<Arc<Fleet>>,
    wake: Notify,
    cancel: CancellationToken,
    /// Back-reference to our own `Arc`, for spawning the scan worker.
    weak: Weak<Router>,
}

struct Bands {
    queues: [VecDeque<Job>; PRIORITY_BANDS],
    worker_alive: bool,
}

/// Outcome of one full scan pass over the bands.
enum Pass {
    /// A job was handed to an endpoint; scan again from the top band.
    Dispatched,
    /// Jobs are queued but none can dispatch right now.
    Blocked,
    /// Every band is empty; the worker exits.
    Drained,
}

impl Router {
    pub fn new(config: DispatchConfig, delivery: Arc<DeliveryQueue>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            config,
            delivery,
            bands: Mutex::new(Bands {
                queues: std::array::from_fn(|_| VecDeque::new()),
                worker_alive: false,
            }),
            fleet: RwLock::new(Fleet::empty()),
            wake: Notify::new(),
            cancel: CancellationToken::new(),
            weak: weak.clone(),
        })
    }

    /// The currently installed fleet.
    pub async fn fleet(&self) -> Arc<Fleet> {
        Arc::clone(&*self.fleet.read().await)
    }

    /// Swap the endpoint fleet wholesale.
    ///
    /// The old fleet's executors finish their in-flight jobs but receive
    /// no new work; queued jobs they still hold are not migrated.
    pub async fn replace_fleet(&self, fleet: Arc<Fleet>) {
        *self.fleet.write().await = fleet;
        self.wake.notify_one();
    }

    /// Stop the scan worker and all executor workers.
    pub fn shutdown(&self) {
        tracing::info!("Dispatch router shutting down");
        self.cancel.cancel();
        self.wake.notify_waiters();
    }

    // ---- submission ----

    /// Queue a job at the given priority (clamped into the band range).
    ///
    /// This is the only admission-control point: the job is rejected here
    /// if no endpoint can ever serve it, or if the requester's queued cost
    /// would exceed the configured ceiling. Returns the total number of
    /// jobs queued at or above the chosen priority as a user-facing
    /// estimate of the wait.
    pub async fn submit(&self, job: Job, priority: usize) -> Result<usize, SubmitError> {
        let priority = priority.min(PRIORITY_BANDS - 1);
        self.admit(job, priority, true).await
    }

    /// Top-priority resubmission after a pre-acceptance dispatch failure.
    ///
    /// Skips admission control and the capability pre-check, but not the
    /// lifetime attempt bound.
    pub(crate) async fn requeue(&self, job: Job) {
        let _ = self.admit(job, 0, false).await;
    }

    async fn admit(
        &self,
        mut job: Job,
        priority: usize,
        checked: bool,
    ) -> Result<usize, SubmitError> {
        job.attempts += 1;
        if job.attempts > self.config.max_dispatch_attempts {
            tracing::warn!(
                job_id = %job.id,
                user = job.user,
                attempts = job.attempts,
                "Job exceeded its dispatch attempt limit, aborting",
            );
            self.delivery
                .enqueue(DeliveryItem::notice(job, GENERIC_FAILURE_TEXT))
                .await;
            return Err(SubmitError::AttemptsExhausted);
        }

        if checked {
            let fleet = self.fleet().await;
            if !fleet
                .executors()
                .iter()
                .any(|executor| executor.is_valid(&job.kind))
            {
                tracing::debug!(
                    job_id = %job.id,
                    kind = job.kind.label(),
                    "Job rejected: no capable endpoint",
                );
                return Err(SubmitError::NoCapableEndpoint);
            }

            let job_cost = cost::estimate(&job.kind);
            let queued = self.user_queued_cost(job.user).await;
            if job_cost + queued > self.config.user_cost_ceiling {
                tracing::debug!(
                    job_id = %job.id,
                    user = job.user,
                    job_cost,
                    queued,
                    "Job rejected: user over cost ceiling",
                );
                return Err(SubmitError::OverBudget {
                    cost: job_cost,
                    queued,
                    ceiling: self.config.user_cost_ceiling,
                });
            }
        }

        // Snapshot endpoint load before inserting so the job itself is
        // never double-counted by a concurrent dispatch.
        let mut length = 0;
        for executor in self.fleet().await.executors() {
            length += executor.queue_len().await;
        }

        let job_id = job.id;
        length += {
            let mut bands = self.bands.lock().await;
            bands.queues[priority].push_back(job);
            if !bands.worker_alive {
                if let Some(this) = self.weak.upgrade() {
                    bands.worker_alive = true;
                    tokio::spawn(this.run_scan());
                }
            }
            bands.queues[..=priority]
                .iter()
                .map(VecDeque::len)
                .sum::<usize>()
        };
        self.wake.notify_one();

        tracing::info!(job_id = %job_id, priority, queue_length = length, "Job queued");
        Ok(length)
    }

    // ---- read aggregates ----

    /// Jobs queued at or above `priority` (default: everything), plus
    /// everything held by endpoint executors.
    pub async fn queue_length(&self, priority: Option<usize>) -> usize {
        let cap = priority.map_or(PRIORITY_BANDS - 1, |p| p.min(PRIORITY_BANDS - 1));
        let mut length: usize = {
            let bands = self.bands.lock().await;
            bands.queues[..=cap].iter().map(VecDeque::len).sum()
        };
        for executor in self.fleet().await.executors() {
            length += executor.queue_len().await;
        }
        length
    }

    /// Estimated total cost of one user's jobs across all bands and all
    /// endpoint executors, including in-flight jobs.
    pub async fn user_queued_cost(&self, user: UserId) -> f64 {
        let mut total: f64 = {
            let bands = self.bands.lock().await;
            bands
                .queues
                .iter()
                .flatten()
                .filter(|job| job.user == user)
                .map(|job| cost::estimate(&job.kind))
                .sum()
        };
        for executor in self.fleet().await.executors() {
            total += executor.user_cost(user).await;
        }
        total
    }

    /// Remove all of a user's not-yet-started jobs from every band and
    /// every endpoint FIFO. Returns the number removed; executing jobs
    /// are not interrupted.
    pub async fn cancel_for_user(&self, user: UserId) -> usize {
        let mut removed = {
            let mut bands = self.bands.lock().await;
            let mut removed = 0;
            for queue in bands.queues.iter_mut() {
                let before = queue.len();
                queue.retain(|job| job.user != user);
                removed += before - queue.len();
            }
            removed
        };
        for executor in self.fleet().await.executors() {
            removed += executor.cancel_user(user).await;
        }
        if removed > 0 {
            tracing::info!(user, removed, "Cancelled queued jobs");
        }
        removed
    }

    // ---- internal plumbing for executors and the fleet ----

    /// Nudge the scan worker (a pipeline slot freed, work arrived).
    pub(crate) fn wake(&self) {
        self.wake.notify_one();
    }

    pub(crate) fn delivery(&self) -> Arc<DeliveryQueue> {
        Arc::clone(&self.delivery)
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    // ---- scan worker ----

    async fn run_scan(self: Arc<Self>) {
        tracing::debug!("Dispatch scan started");
        loop {
            if self.cancel.is_cancelled() {
                self.bands.lock().await.worker_alive = false;
                return;
            }
            match self.dispatch_pass().await {
                Pass::Dispatched => continue,
                Pass::Blocked => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => {}
                        _ = self.wake.notified() => {}
                        _ = tokio::time::sleep(self.config.scan_backoff) => {}
                    }
                }
                Pass::Drained => {
                    let mut bands = self.bands.lock().await;
                    if bands.queues.iter().all(VecDeque::is_empty) {
                        bands.worker_alive = false;
                        return;
                    }
                    // A submission slipped in after the pass; go again.
                }
            }
        }
    }

    /// One scan from the top band down, with skip-ahead within a band.
    async fn dispatch_pass(&self) -> Pass {
        let fleet = self.fleet().await;
        let mut skipped = false;

        for band in 0..PRIORITY_BANDS {
            let mut index = 0;
            loop {
                // Snapshot the job at this position; the band lock is not
                // held across endpoint queries.
                let snapshot = {
                    let bands = self.bands.lock().await;
                    bands.queues[band]
                        .get(index)
                        .map(|job| (job.id, job.kind.clone()))
                };
                let Some((job_id, kind)) = snapshot else { break };

                let valid: Vec<Arc<EndpointExecutor>> = fleet
                    .executors()
                    .iter()
                    .filter(|executor| executor.is_valid(&kind))
                    .map(Arc::clone)
                    .collect();

                if valid.is_empty() {
                    // No endpoint will ever serve this job; reject it for
                    // good rather than letting it rot in the band.
                    if let Some(job) = self.remove_job(band, job_id).await {
                        tracing::warn!(
                            job_id = %job.id,
                            kind = job.kind.label(),
                            "Job dropped: no endpoint can serve it",
                        );
                        self.delivery
                            .enqueue(DeliveryItem::notice(job, REJECTED_TEXT))
                            .await;
                    }
                    // The queue shifted; this index now holds the next job.
                    continue;
                }

                match self.select_target(&kind, &valid, &fleet).await {
                    Some(target) => {
                        if let Some(job) = self.remove_job(band, job_id).await {
                            tracing::debug!(
                                job_id = %job.id,
                                endpoint = target.name(),
                                band,
                                "Job dispatched",
                            );
                            target.enqueue(job).await;
                            return Pass::Dispatched;
                        }
                        // Cancelled while we were deciding; re-examine the
                        // same slot.
                    }
                    None => {
                        skipped = true;
                        index += 1;
                    }
                }
            }
        }

        if skipped {
            Pass::Blocked
        } else {
            Pass::Drained
        }
    }

    /// Pick an endpoint for a job, best preference first: an idle endpoint
    /// with the requested model warm, a free pipeline slot with the model
    /// warm, any idle endpoint, any free pipeline slot. Within a tier the
    /// endpoint with the least queued cost wins.
    async fn select_target(
        &self,
        kind: &JobKind,
        valid: &[Arc<EndpointExecutor>],
        fleet: &Fleet,
    ) -> Option<Arc<EndpointExecutor>> {
        let wanted = kind.requested_model();
        let depth = self.config.pipeline_depth;
        let tiers: [(usize, bool); 4] = [(1, true), (depth, true), (1, false), (depth, false)];

        for (limit, require_warm) in tiers {
            if require_warm && wanted.is_none() {
                continue;
            }
            let mut best: Option<(Arc<EndpointExecutor>, f64)> = None;
            for executor in valid {
                if require_warm && executor.warm_model().await.as_deref() != wanted {
                    continue;
                }
                if !executor.is_ready(limit, fleet).await {
                    continue;
                }
                let load = executor.queued_cost().await;
                if best.as_ref().map_or(true, |(_, lowest)| load < *lowest) {
                    best = Some((Arc::clone(executor), load));
                }
            }
            if let Some((executor, _)) = best {
                return Some(executor);
            }
        }
        None
    }

    async fn remove_job(&self, band: usize, id: JobId) -> Option<Job> {
        let mut bands = self.bands.lock().await;
        let queue = &mut bands.queues[band];
        let position = queue.iter().position(|job| job.id == id)?;
        queue.remove(position)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Rejections raised by [`Router::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// No endpoint in the current fleet can serve this job variant.
    #[error("No endpoint can serve this job")]
    NoCapableEndpoint,

    /// The requester's queued cost would exceed the configured ceiling.
    #[error("Queued cost {queued:.1} plus job cost {cost:.1} exceeds ceiling {ceiling:.1}")]
    OverBudget {
        cost: f64,
        queued: f64,
        ceiling: f64,
    },

    /// The job has exhausted its dispatch attempts and was aborted.
    #[error("Job exceeded its dispatch attempt limit")]
    AttemptsExhausted,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
