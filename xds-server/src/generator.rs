//! Resource generation capabilities, keyed by type URL.
//!
//! A generator turns a push into the resources one proxy should receive for
//! one type. Two capabilities exist:
//!
//! - [`ResourceGenerator`] produces the full set of resources; the server
//!   derives removals by comparing against what the proxy subscribed to.
//! - [`DeltaResourceGenerator`] produces added/updated resources plus an
//!   explicit list of removed names, and may fall back to full-set semantics
//!   per push.
//!
//! Generators run synchronously on the connection's task and must not block.
//!
//! # Example
//!
//! ```ignore
//! struct Clusters(Arc<ClusterSnapshot>);
//!
//! impl ResourceGenerator for Clusters {
//!     fn generate(
//!         &self,
//!         proxy: &Proxy,
//!         watched: &WatchedResource,
//!         request: &PushRequest,
//!     ) -> Result<Option<Generated>, BoxError> {
//!         let resources = self.0.clusters_for(proxy, watched)?;
//!         Ok(Some(Generated::new(resources)))
//!     }
//! }
//!
//! let generators = GeneratorRegistry::new().with_full(CLUSTER_TYPE, Clusters(snapshot));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::message::Resource;
use crate::model::{Proxy, PushRequest, WatchedResource};

/// Extra information a generator reports for push logs.
#[derive(Debug, Clone, Default)]
pub struct LogDetails {
    /// The push only carried changed resources.
    pub incremental: bool,
    /// Free-form suffix appended to the push log line.
    pub additional_info: String,
}

/// Output of a [`ResourceGenerator`].
#[derive(Debug, Clone, Default)]
pub struct Generated {
    /// The complete set of resources the proxy should have.
    pub resources: Vec<Resource>,
    /// Set by generators that recompute the subscribed names on every push;
    /// replaces the tracked names once the response is sent.
    pub resource_names: Option<BTreeSet<String>>,
    /// Log details.
    pub details: LogDetails,
}

impl Generated {
    /// Output carrying `resources`.
    pub fn new(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            ..Default::default()
        }
    }
}

/// Output of a [`DeltaResourceGenerator`].
#[derive(Debug, Clone, Default)]
pub struct DeltaGenerated {
    /// Resources to add or update.
    pub resources: Vec<Resource>,
    /// Names the proxy must drop. Only honored when `used_delta` is set.
    pub removed: Vec<String>,
    /// The generator computed a real delta. When false the output is treated
    /// like a [`Generated`] full set.
    pub used_delta: bool,
    /// See [`Generated::resource_names`].
    pub resource_names: Option<BTreeSet<String>>,
    /// Log details.
    pub details: LogDetails,
}

impl DeltaGenerated {
    /// A delta adding `resources` and removing `removed`.
    pub fn delta(resources: Vec<Resource>, removed: Vec<String>) -> Self {
        Self {
            resources,
            removed,
            used_delta: true,
            ..Default::default()
        }
    }
}

/// Generates the full resource set for a type.
pub trait ResourceGenerator: Send + Sync + 'static {
    /// Generate resources for `proxy`. `Ok(None)` means nothing to push.
    fn generate(
        &self,
        proxy: &Proxy,
        watched: &WatchedResource,
        request: &PushRequest,
    ) -> Result<Option<Generated>, BoxError>;
}

/// Generates incremental changes for a type.
pub trait DeltaResourceGenerator: Send + Sync + 'static {
    /// Generate changes for `proxy`. `Ok(None)` means nothing to push.
    fn generate_deltas(
        &self,
        proxy: &Proxy,
        request: &PushRequest,
        watched: &WatchedResource,
    ) -> Result<Option<DeltaGenerated>, BoxError>;
}

/// A generator tagged with the capability it supports.
#[derive(Clone)]
pub enum Generator {
    /// Full-set generation only.
    Full(Arc<dyn ResourceGenerator>),
    /// Delta-capable generation.
    Delta(Arc<dyn DeltaResourceGenerator>),
}

impl fmt::Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generator::Full(_) => f.write_str("Generator::Full(<generator>)"),
            Generator::Delta(_) => f.write_str("Generator::Delta(<generator>)"),
        }
    }
}

/// Generator output normalized across capabilities.
#[derive(Debug, Default)]
pub(crate) struct GeneratorOutput {
    pub(crate) resources: Vec<Resource>,
    /// `Some` when the generator used delta semantics.
    pub(crate) removed: Option<Vec<String>>,
    pub(crate) resource_names: Option<BTreeSet<String>>,
    pub(crate) details: LogDetails,
}

impl Generator {
    /// Run whichever capability this generator supports.
    pub(crate) fn generate(
        &self,
        proxy: &Proxy,
        watched: &WatchedResource,
        request: &PushRequest,
    ) -> Result<Option<GeneratorOutput>, BoxError> {
        let output = match self {
            Generator::Full(generator) => {
                generator
                    .generate(proxy, watched, request)?
                    .map(|generated| GeneratorOutput {
                        resources: generated.resources,
                        removed: None,
                        resource_names: generated.resource_names,
                        details: generated.details,
                    })
            }
            Generator::Delta(generator) => generator
                .generate_deltas(proxy, request, watched)?
                .map(|generated| GeneratorOutput {
                    resources: generated.resources,
                    removed: generated.used_delta.then_some(generated.removed),
                    resource_names: generated.resource_names,
                    details: generated.details,
                }),
        };
        Ok(output)
    }
}

/// Flat registry mapping type URLs to generators.
///
/// A type without a generator is never pushed.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Generator>,
}

impl GeneratorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a full-set generator for `type_url`.
    pub fn with_full(mut self, type_url: impl Into<String>, generator: impl ResourceGenerator) -> Self {
        self.insert(type_url, Generator::Full(Arc::new(generator)));
        self
    }

    /// Register a delta-capable generator for `type_url`.
    pub fn with_delta(
        mut self,
        type_url: impl Into<String>,
        generator: impl DeltaResourceGenerator,
    ) -> Self {
        self.insert(type_url, Generator::Delta(Arc::new(generator)));
        self
    }

    /// Register `generator` for `type_url`, replacing any previous one.
    pub fn insert(&mut self, type_url: impl Into<String>, generator: Generator) {
        self.generators.insert(type_url.into(), generator);
    }

    /// The generator for `type_url`.
    pub fn get(&self, type_url: &str) -> Option<&Generator> {
        self.generators.get(type_url)
    }

    /// Returns true if no generator is registered.
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}
