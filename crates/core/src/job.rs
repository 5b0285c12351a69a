//! Job data model shared across the dispatch pipeline.
//!
//! A [`Job`] is one unit of remote compute work. The dispatcher treats all
//! variants uniformly; the variant parameters in [`JobKind`] feed only the
//! cost model and per-endpoint validity checks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Snowflake-style id of the requesting user.
pub type UserId = u64;

/// Unique id assigned to a job at construction.
pub type JobId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Opaque name of the place a result is posted back to (e.g. a channel id).
/// The delivery sink interprets it; the dispatcher only carries it along.
pub type DeliveryTarget = String;

// ---------------------------------------------------------------------------
// DeliveryFlag
// ---------------------------------------------------------------------------

/// Shared completion marker for a job's result delivery.
///
/// Every job owns one flag. Chained batch jobs additionally hold a clone of
/// their predecessor's flag so the delivery queue can hold a result back
/// until the one before it has gone out. Cloning is cheap and keeps the
/// [`Job`] itself movable between queues.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFlag(Arc<AtomicBool>);

impl DeliveryFlag {
    /// Mark the associated result as delivered.
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the associated result has been delivered.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// Variant parameters
// ---------------------------------------------------------------------------

/// Parameters of a text/image-to-image synthesis request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawParams {
    /// Checkpoint the job wants loaded; `None` means "whatever is warm".
    pub model: Option<String>,
    /// Diffusion step count.
    pub steps: u32,
    pub width: u32,
    pub height: u32,
    /// Sampling algorithm name.
    pub sampler: String,
    /// Number of images produced in one invocation.
    pub batch: u32,
    /// Whether an init image is attached (image-to-image).
    pub init_image: bool,
    /// Denoising strength for the init image or high-res second pass.
    pub strength: f64,
    /// Whether the two-pass high-resolution fix is enabled.
    pub highres_fix: bool,
    /// Whether a control-image conditioning pass is attached.
    pub control_net: bool,
}

/// Parameters of an image upscaling request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpscaleParams {
    /// Upscaler backends to apply (the second, if any, is blended in).
    pub upscalers: Vec<String>,
}

/// Parameters of an image captioning request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyParams {
    /// Caption models to run. More than one means "combined" mode, which
    /// fans out across all of them.
    pub models: Vec<String>,
}

/// The concrete kind of work a job asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobKind {
    Draw(DrawParams),
    Upscale(UpscaleParams),
    Identify(IdentifyParams),
}

impl JobKind {
    /// Checkpoint this job wants warm on its endpoint, if it names one.
    ///
    /// Only synthesis jobs carry a model preference; the router uses this
    /// for warm-model affinity when picking an endpoint.
    pub fn requested_model(&self) -> Option<&str> {
        match self {
            JobKind::Draw(params) => params.model.as_deref(),
            _ => None,
        }
    }

    /// Short label for log fields.
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Draw(_) => "draw",
            JobKind::Upscale(_) => "upscale",
            JobKind::Identify(_) => "identify",
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A single dispatchable request unit.
///
/// A job is owned by exactly one queue at any instant: a router priority
/// band, one endpoint's FIFO, or the invocation currently executing it.
/// It moves router -> endpoint -> delivery, never backwards except for a
/// top-priority requeue after a pre-acceptance dispatch failure.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub user: UserId,
    pub kind: JobKind,
    /// Opaque request body forwarded verbatim to the endpoint.
    pub payload: serde_json::Value,
    pub target: DeliveryTarget,
    /// Times this job has entered the router, across all endpoints.
    /// Bounds retries over the job's whole lifetime, not per endpoint.
    pub attempts: u32,
    /// Set once this job's result (or failure notice) has been delivered.
    pub delivered: DeliveryFlag,
    /// Delivery flag of the job this one is chained behind, if any.
    pub predecessor: Option<DeliveryFlag>,
    pub submitted_at: Timestamp,
}

impl Job {
    /// Create a new job with a fresh id and a zeroed attempt counter.
    pub fn new(
        user: UserId,
        kind: JobKind,
        payload: serde_json::Value,
        target: impl Into<DeliveryTarget>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            user,
            kind,
            payload,
            target: target.into(),
            attempts: 0,
            delivered: DeliveryFlag::default(),
            predecessor: None,
            submitted_at: chrono::Utc::now(),
        }
    }

    /// Chain this job behind `previous` so its result is held back until
    /// the previous job's result has been delivered.
    pub fn chain_after(mut self, previous: &Job) -> Self {
        self.predecessor = Some(previous.delivered.clone());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
