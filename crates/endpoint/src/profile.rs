//! Operator-supplied configuration for one endpoint slot.

use serde::{Deserialize, Serialize};

use easel_core::Capability;

/// Static description of an endpoint in a fleet.
///
/// Capability disables mirror operator flags that forbid a job variant on
/// an otherwise capable endpoint. `depends_on` chains a secondary endpoint
/// behind a primary so the secondary only takes work while the primary is
/// fully idle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointProfile {
    /// Unique name; also the target of `depends_on` references.
    pub name: String,

    /// Job variants the operator has disabled on this endpoint.
    #[serde(default)]
    pub disabled: Vec<Capability>,

    /// Name of the endpoint that must be idle before this one runs jobs.
    #[serde(default)]
    pub depends_on: Option<String>,
}

impl EndpointProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Disable a job variant on this endpoint.
    pub fn with_disabled(mut self, capability: Capability) -> Self {
        if !self.disabled.contains(&capability) {
            self.disabled.push(capability);
        }
        self
    }

    /// Chain this endpoint behind another one.
    pub fn with_depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on = Some(name.into());
        self
    }

    pub fn is_disabled(&self, capability: Capability) -> bool {
        self.disabled.contains(&capability)
    }
}
