//! Remote endpoint contract for the easel dispatch pipeline.
//!
//! The dispatcher never speaks a worker's wire protocol itself. It drives
//! an [`EndpointClient`] implementation supplied by the embedding
//! application and pairs it with an operator-supplied [`EndpointProfile`]:
//!
//! - [`EndpointClient`] — online/capability state plus the two-phase
//!   `invoke` call with its early [`AcceptedSignal`].
//! - [`EndpointProfile`] — per-endpoint operator configuration (disabled
//!   variants, dependency chaining).
//! - [`backoff`] — exponential retry pacing for reconnect-and-requeue.

pub mod backoff;
pub mod client;
pub mod profile;

pub use backoff::{Backoff, RetryPolicy};
pub use client::{AcceptedSignal, Attachment, EndpointClient, InvokeError, InvokeResult};
pub use profile::EndpointProfile;
