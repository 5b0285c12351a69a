//! The endpoint fleet.
//!
//! A [`Fleet`] is an immutable set of [`EndpointExecutor`]s built from
//! profile/client pairs. On reconfiguration a whole new fleet is built
//! and swapped onto the router atomically; the old fleet's executors
//! finish their in-flight work and drain, but are never mutated in place
//! while the dispatch loop runs.

use std::sync::Arc;

use easel_endpoint::{EndpointClient, EndpointProfile};

use crate::executor::EndpointExecutor;
use crate::router::Router;

/// Immutable set of endpoint executors.
pub struct Fleet {
    executors: Vec<Arc<EndpointExecutor>>,
}

impl Fleet {
    /// A fleet with no endpoints, used before the first configuration.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            executors: Vec::new(),
        })
    }

    /// Build a fleet from profile/client pairs.
    ///
    /// `depends_on` names are resolved to fleet slots here; references to
    /// unknown endpoints (or to the endpoint itself) are logged and
    /// ignored rather than failing the reload.
    pub fn build(
        endpoints: Vec<(EndpointProfile, Arc<dyn EndpointClient>)>,
        router: &Arc<Router>,
    ) -> Arc<Self> {
        let names: Vec<String> = endpoints
            .iter()
            .map(|(profile, _)| profile.name.clone())
            .collect();

        let mut executors = Vec::with_capacity(endpoints.len());
        for (slot, (profile, client)) in endpoints.into_iter().enumerate() {
            let depends_on = profile.depends_on.as_ref().and_then(|name| {
                match names.iter().position(|candidate| candidate == name) {
                    Some(index) if index == slot => {
                        tracing::warn!(
                            endpoint = %profile.name,
                            "Endpoint depends on itself, ignoring",
                        );
                        None
                    }
                    Some(index) => Some(index),
                    None => {
                        tracing::warn!(
                            endpoint = %profile.name,
                            depends_on = %name,
                            "Unknown dependency endpoint, ignoring",
                        );
                        None
                    }
                }
            });

            executors.push(EndpointExecutor::new(
                profile,
                client,
                depends_on,
                Arc::downgrade(router),
                router.delivery(),
                router.child_token(),
            ));
        }

        tracing::info!(endpoints = executors.len(), "Fleet built");
        Arc::new(Self { executors })
    }

    pub fn executors(&self) -> &[Arc<EndpointExecutor>] {
        &self.executors
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Arc<EndpointExecutor>> {
        self.executors.get(index)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
