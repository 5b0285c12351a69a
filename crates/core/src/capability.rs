//! Endpoint capability flags.
//!
//! Endpoints advertise a [`CapabilitySet`]; the router checks it against
//! the capability a job variant requires before considering the endpoint
//! as a dispatch target.

use serde::{Deserialize, Serialize};

use crate::job::JobKind;

/// A class of work an endpoint can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Text/image-to-image synthesis.
    Synthesis,
    /// Image upscaling.
    Upscale,
    /// Image captioning.
    Caption,
    /// Control-image conditioning during synthesis.
    ControlNet,
}

impl Capability {
    /// The capability an endpoint must have to run `kind` at all.
    ///
    /// Sub-capabilities such as [`Capability::ControlNet`] are checked
    /// separately, on top of the base variant capability.
    pub fn required_for(kind: &JobKind) -> Capability {
        match kind {
            JobKind::Draw(_) => Capability::Synthesis,
            JobKind::Upscale(_) => Capability::Upscale,
            JobKind::Identify(_) => Capability::Caption,
        }
    }
}

/// Set of capabilities an endpoint advertises.
///
/// The domain is tiny, so this is a plain vector with linear lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilitySet(Vec<Capability>);

impl CapabilitySet {
    /// Every capability, for endpoints with no restrictions.
    pub fn all() -> Self {
        Self(vec![
            Capability::Synthesis,
            Capability::Upscale,
            Capability::Caption,
            Capability::ControlNet,
        ])
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) {
        if !self.0.contains(&capability) {
            self.0.push(capability);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut set = Self::default();
        for capability in iter {
            set.insert(capability);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
