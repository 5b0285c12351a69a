//! Shared test doubles and helpers for the dispatch integration tests.
//!
//! [`FakeEndpoint`] scripts how a remote endpoint behaves around the
//! two-phase invoke protocol; [`RecordingSink`] captures everything the
//! delivery queue sends out, in order, and can script failures.

#![allow(dead_code)] // each test binary uses a different subset

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use easel_core::{CapabilitySet, DrawParams, IdentifyParams, Job, JobId, JobKind, UserId};
use easel_dispatch::{
    DeliveryError, DeliveryItem, DeliveryQueue, DeliverySink, DispatchConfig, Fleet, Router,
};
use easel_endpoint::{
    AcceptedSignal, EndpointClient, EndpointProfile, InvokeError, InvokeResult,
};

// ---------------------------------------------------------------------------
// FakeEndpoint
// ---------------------------------------------------------------------------

/// How a [`FakeEndpoint`] responds to invocations.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Fire the accepted signal after `accept_after`, then return a
    /// result after a further `complete_after`.
    Succeed {
        accept_after: Duration,
        complete_after: Duration,
    },
    /// Return `Unavailable` without firing the accepted signal.
    Refuse,
    /// Fire the accepted signal, then fail remotely.
    FailAfterAccept,
    /// Fire the accepted signal, then never finish.
    StallAfterAccept,
    /// Neither accept nor return.
    Stall,
    /// Fire the accepted signal, then wait for the test to call
    /// [`FakeEndpoint::release`] before returning a result.
    GatedComplete,
}

/// Scriptable [`EndpointClient`] double.
pub struct FakeEndpoint {
    online: AtomicBool,
    capabilities: CapabilitySet,
    models: Vec<String>,
    upscalers: Vec<String>,
    behavior: Behavior,
    /// Total `invoke` calls.
    pub invocations: AtomicUsize,
    /// Highest number of concurrent `invoke` calls observed.
    pub peak_in_flight: AtomicUsize,
    active: AtomicUsize,
    started: Mutex<Vec<JobId>>,
    gate: tokio::sync::Semaphore,
}

impl FakeEndpoint {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            online: AtomicBool::new(true),
            capabilities: CapabilitySet::all(),
            models: vec!["anime-v3".to_string(), "photo-v1".to_string()],
            upscalers: vec!["Lanczos".to_string()],
            behavior,
            invocations: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            gate: tokio::sync::Semaphore::new(0),
        }
    }

    /// Let `count` gated invocations complete.
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Ids of the jobs this endpoint has started, in invocation order.
    pub fn started_ids(&self) -> Vec<JobId> {
        self.started.lock().unwrap().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::Acquire)
    }
}

#[async_trait]
impl EndpointClient for FakeEndpoint {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities.clone()
    }

    fn available_models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn available_upscalers(&self) -> Vec<String> {
        self.upscalers.clone()
    }

    async fn invoke(
        &self,
        job: &Job,
        mut accepted: AcceptedSignal,
    ) -> Result<InvokeResult, InvokeError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(job.id);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(active, Ordering::SeqCst);

        let outcome = match self.behavior {
            Behavior::Refuse => Err(InvokeError::Unavailable("connection refused".to_string())),
            Behavior::Stall => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::FailAfterAccept => {
                accepted.fire();
                Err(InvokeError::Remote("CUDA out of memory".to_string()))
            }
            Behavior::StallAfterAccept => {
                accepted.fire();
                std::future::pending::<()>().await;
                unreachable!()
            }
            Behavior::GatedComplete => {
                accepted.fire();
                let permit = self.gate.acquire().await.expect("gate never closes");
                permit.forget();
                Ok(InvokeResult {
                    content: format!("result for {}", job.id),
                    attachments: Vec::new(),
                })
            }
            Behavior::Succeed {
                accept_after,
                complete_after,
            } => {
                tokio::time::sleep(accept_after).await;
                accepted.fire();
                tokio::time::sleep(complete_after).await;
                Ok(InvokeResult {
                    content: format!("result for {}", job.id),
                    attachments: Vec::new(),
                })
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn reconnect(&self) {}
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// One message the sink accepted.
#[derive(Debug, Clone)]
pub struct DeliveredNote {
    pub job_id: JobId,
    pub content: String,
    pub ephemeral: bool,
}

/// Delivery sink that records accepted items in order and can script
/// failures for upcoming calls.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<DeliveredNote>>,
    script: Mutex<VecDeque<DeliveryError>>,
    pub calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next delivery call with `error` (queued in order).
    pub fn fail_next(&self, error: DeliveryError) {
        self.script.lock().unwrap().push_back(error);
    }

    pub fn delivered(&self) -> Vec<DeliveredNote> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_ids(&self) -> Vec<JobId> {
        self.delivered().iter().map(|note| note.job_id).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, item: &DeliveryItem) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.delivered.lock().unwrap().push(DeliveredNote {
            job_id: item.job.id,
            content: item.content.clone(),
            ephemeral: item.ephemeral,
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Fully wired pipeline around fakes: sink -> delivery -> router -> fleet.
pub struct Harness {
    pub router: Arc<Router>,
    pub delivery: Arc<DeliveryQueue>,
    pub sink: Arc<RecordingSink>,
    pub fleet: Arc<Fleet>,
}

/// Build a pipeline over the given endpoints with fast test backoffs.
pub async fn harness(endpoints: Vec<(EndpointProfile, Arc<dyn EndpointClient>)>) -> Harness {
    harness_with_config(endpoints, test_config()).await
}

pub async fn harness_with_config(
    endpoints: Vec<(EndpointProfile, Arc<dyn EndpointClient>)>,
    config: DispatchConfig,
) -> Harness {
    init_tracing();
    let sink = Arc::new(RecordingSink::new());
    let delivery = DeliveryQueue::new(
        Arc::clone(&sink) as Arc<dyn DeliverySink>,
        config.clone(),
    );
    let router = Router::new(config, Arc::clone(&delivery));
    let fleet = Fleet::build(endpoints, &router);
    router.replace_fleet(Arc::clone(&fleet)).await;
    Harness {
        router,
        delivery,
        sink,
        fleet,
    }
}

/// Default config with short backoffs so paused-time tests advance fast.
pub fn test_config() -> DispatchConfig {
    DispatchConfig {
        scan_backoff: Duration::from_millis(20),
        ..DispatchConfig::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Job builders
// ---------------------------------------------------------------------------

/// A baseline-cost (1.0) synthesis job.
pub fn draw_job(user: UserId, model: Option<&str>) -> Job {
    Job::new(
        user,
        JobKind::Draw(DrawParams {
            model: model.map(str::to_string),
            steps: 20,
            width: 512,
            height: 512,
            sampler: "Euler a".to_string(),
            batch: 1,
            init_image: false,
            strength: 0.75,
            highres_fix: false,
            control_net: false,
        }),
        serde_json::json!({"prompt": "a lighthouse at dusk"}),
        "channel-1",
    )
}

/// A single-model captioning job (cost 1.0).
pub fn identify_job(user: UserId) -> Job {
    Job::new(
        user,
        JobKind::Identify(IdentifyParams {
            models: vec!["clip".to_string()],
        }),
        serde_json::json!({"image": "https://example.test/input.png"}),
        "channel-1",
    )
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Poll `condition` every 10 ms until it holds, panicking after ~30 s of
/// (virtual) time. Paused-time tests auto-advance through the sleeps.
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..3_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met before the wait timeout");
}
