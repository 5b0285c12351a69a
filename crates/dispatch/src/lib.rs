//! Job dispatch and delivery pipeline.
//!
//! A single-process, in-memory scheduler that routes generative-compute
//! jobs to a small fleet of remote worker endpoints:
//!
//! - [`Router`] — ten priority bands, admission control, and the
//!   affinity-aware dispatch scan.
//! - [`EndpointExecutor`] — one per endpoint; a FIFO drained by a
//!   two-deep execution pipeline.
//! - [`DeliveryQueue`] — drains completed results back to requesters,
//!   serializing chained-batch order and retrying transient failures.
//! - [`Fleet`] — the immutable endpoint set, swapped wholesale on
//!   reconfiguration.
//!
//! Construction order: build the delivery queue, then the router, then
//! the fleet, and install the fleet on the router:
//!
//! ```ignore
//! let delivery = DeliveryQueue::new(sink, config.clone());
//! let router = Router::new(config, Arc::clone(&delivery));
//! let fleet = Fleet::build(endpoints, &router);
//! router.replace_fleet(fleet).await;
//! ```

pub mod config;
pub mod delivery;
pub mod executor;
pub mod fleet;
pub mod router;

pub use config::DispatchConfig;
pub use delivery::{DeliveryError, DeliveryItem, DeliveryQueue, DeliverySink};
pub use executor::EndpointExecutor;
pub use fleet::Fleet;
pub use router::{Router, SubmitError, PRIORITY_BANDS};
