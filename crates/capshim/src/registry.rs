//! Declarative catalog of substitution points.
//!
//! Each [`PatchDescriptor`] names one logical component, the
//! [`TargetLocation`] whose handle gets rewritten, and the factory that
//! produces the replacement adapter for a resolved configuration.
//! Descriptors are immutable once registered and live for the registry's
//! lifetime. Registration itself touches no binding table; side effects
//! belong to activation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::adapter::BuiltAdapter;
use crate::config::ResolvedConfig;
use crate::error::ShimError;
use crate::events::EventLog;

// ---------------------------------------------------------------------------
// Target locations
// ---------------------------------------------------------------------------

/// Namespace path plus symbol name identifying where a component's
/// well-known handle lives in the binding table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetLocation {
    pub namespace: String,
    pub symbol: String,
}

impl TargetLocation {
    pub fn new(namespace: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            symbol: symbol.into(),
        }
    }
}

impl fmt::Display for TargetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.symbol)
    }
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Produces the replacement adapter for one component. Invoked once per
/// successful activation of that component; may be invoked again after a
/// deactivate/activate cycle, so it must be repeatable.
pub type ReplacementFactory =
    Box<dyn Fn(&ResolvedConfig, &EventLog) -> Result<BuiltAdapter, ShimError> + Send + Sync>;

/// One substitutable point: unique component name, target location, and
/// replacement factory.
pub struct PatchDescriptor {
    component_name: String,
    target_location: TargetLocation,
    replacement_factory: ReplacementFactory,
}

impl PatchDescriptor {
    pub fn new(
        component_name: impl Into<String>,
        target_location: TargetLocation,
        replacement_factory: impl Fn(&ResolvedConfig, &EventLog) -> Result<BuiltAdapter, ShimError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            component_name: component_name.into(),
            target_location,
            replacement_factory: Box::new(replacement_factory),
        }
    }

    #[must_use]
    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    #[must_use]
    pub fn target_location(&self) -> &TargetLocation {
        &self.target_location
    }

    /// Run the replacement factory for a resolved configuration.
    pub fn build(
        &self,
        resolved: &ResolvedConfig,
        events: &EventLog,
    ) -> Result<BuiltAdapter, ShimError> {
        (self.replacement_factory)(resolved, events)
    }
}

impl fmt::Debug for PatchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchDescriptor")
            .field("component_name", &self.component_name)
            .field("target_location", &self.target_location)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Registry of patch descriptors, keyed by component name, iterated in
/// registration order so activation logging is deterministic.
#[derive(Debug, Default)]
pub struct PatchRegistry {
    descriptors: Vec<PatchDescriptor>,
    index: BTreeMap<String, usize>,
}

impl PatchRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a descriptor. Fails if the component name is already present.
    pub fn register(&mut self, descriptor: PatchDescriptor) -> Result<(), ShimError> {
        if self.index.contains_key(descriptor.component_name()) {
            return Err(ShimError::DuplicateComponent {
                component: descriptor.component_name().to_string(),
            });
        }
        self.index
            .insert(descriptor.component_name().to_string(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// All descriptors in registration order.
    #[must_use]
    pub fn list(&self) -> &[PatchDescriptor] {
        &self.descriptors
    }

    /// Look up a descriptor by component name.
    pub fn find(&self, component_name: &str) -> Result<&PatchDescriptor, ShimError> {
        self.index
            .get(component_name)
            .map(|&i| &self.descriptors[i])
            .ok_or_else(|| ShimError::UnknownComponent {
                component: component_name.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, component_name: &str) -> bool {
        self.index.contains_key(component_name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
