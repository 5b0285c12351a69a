//! Contract between the dispatch pipeline and a remote worker endpoint.
//!
//! Invocation is a two-phase protocol. Implementations must fire the
//! [`AcceptedSignal`] once the remote side has durably accepted the
//! submission (typically right after a model-switch request completes),
//! well before the generated result is available. That early release is
//! what lets an executor overlap one running job with the submission of
//! the next; collapsing the two phases into ordinary completion would
//! collapse the pipeline to depth 1.

use async_trait::async_trait;
use easel_core::{CapabilitySet, Job};
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// AcceptedSignal
// ---------------------------------------------------------------------------

/// Early acceptance signal for a two-phase invocation.
///
/// Fire it with [`fire`](AcceptedSignal::fire) as soon as the remote
/// endpoint has accepted the job. Dropping the signal unfired tells the
/// executor the invocation failed before acceptance, which makes the job
/// eligible for re-dispatch on another endpoint.
#[derive(Debug)]
pub struct AcceptedSignal(Option<oneshot::Sender<()>>);

impl AcceptedSignal {
    /// Create a signal plus the receiving half the executor waits on.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(Some(tx)), rx)
    }

    /// Signal that the remote side has accepted the submission.
    ///
    /// Firing more than once is a no-op.
    pub fn fire(&mut self) {
        if let Some(tx) = self.0.take() {
            // A send error only means the executor stopped listening.
            let _ = tx.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A file attached to a delivered result (e.g. a generated image).
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Completed result payload produced by a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct InvokeResult {
    /// Text shown to the requester alongside any attachments.
    pub content: String,
    pub attachments: Vec<Attachment>,
}

// ---------------------------------------------------------------------------
// EndpointClient
// ---------------------------------------------------------------------------

/// Handle to one remote worker endpoint.
///
/// Implemented by the embedding application; the dispatch pipeline only
/// consumes it. State queries are synchronous snapshots so the router can
/// call them on every dispatch decision without awaiting the network.
#[async_trait]
pub trait EndpointClient: Send + Sync {
    /// Whether the endpoint is currently reachable.
    fn is_online(&self) -> bool;

    /// Classes of work this endpoint can perform.
    fn capabilities(&self) -> CapabilitySet;

    /// Model checkpoints installed on this endpoint.
    fn available_models(&self) -> Vec<String>;

    /// Upscaler backends installed on this endpoint.
    fn available_upscalers(&self) -> Vec<String>;

    /// Run one job remotely.
    ///
    /// Must fire `accepted` once the submission is durably accepted and
    /// before the slow generation/result fetch. Errors raised before the
    /// signal fires are treated as dispatch failures and the job is
    /// retried elsewhere; errors after it are final for this invocation.
    async fn invoke(&self, job: &Job, accepted: AcceptedSignal)
        -> Result<InvokeResult, InvokeError>;

    /// Re-establish the remote session after a connection failure.
    async fn reconnect(&self);
}

/// Errors raised by [`EndpointClient::invoke`].
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The endpoint could not take the job (no session, unreachable).
    /// Only valid before the accepted signal has fired.
    #[error("Endpoint unavailable: {0}")]
    Unavailable(String),

    /// The remote side failed after accepting the job.
    #[error("Remote execution failed: {0}")]
    Remote(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
