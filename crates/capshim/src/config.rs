//! Layered enablement configuration for substitution points.
//!
//! Resolution walks a fixed precedence chain, highest first: a call-time
//! [`Override`] passed to the activation request, the per-component
//! [`Switch`], the global [`Switch`], and finally the compiled-in default
//! (enabled, automatic backend selection). `Auto` at any level defers to the
//! next lower level; `Disabled` at a higher level wins regardless of what
//! lower levels say.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tri-state enablement switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Switch {
    Enabled,
    Disabled,
    /// Defer to the next lower precedence level.
    #[default]
    Auto,
}

/// Call-time override for one component, highest precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Override {
    /// Do not activate this component at all.
    Disable,
    /// Activate and require the preferred backend; a failed construction
    /// probe is an activation error and per-call failures propagate rather
    /// than degrade.
    ForcePreferred,
    /// Activate in reference-only mode; the preferred backend is never
    /// probed or constructed.
    ForceReference,
}

/// Call-time override map keyed by component name.
pub type Overrides = BTreeMap<String, Override>;

/// Which backend the adapter should try to serve calls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSelection {
    /// Probe preferred-backend constructibility at activation; fall back to
    /// reference-only mode when the probe fails, without raising an error.
    #[default]
    Auto,
    ForcePreferred,
    ForceReference,
}

/// What the adapter does when a preferred-backend call fails with a
/// backend-capability fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Set the sticky degrade flag, emit one diagnostic, retry the call
    /// once on the reference backend.
    #[default]
    AutoDegrade,
    /// Surface the preferred-backend failure directly.
    Propagate,
}

/// Layered switch configuration, loadable from TOML or JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubstitutionConfig {
    /// Global switch consulted when a component has no switch of its own.
    pub global: Switch,
    /// Per-component switches, keyed by component name.
    pub components: BTreeMap<String, Switch>,
}

/// Outcome of resolving the configuration for one component, for one
/// activation request. Never persisted; recomputed per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    pub enabled: bool,
    pub selection: BackendSelection,
    pub fallback: FallbackPolicy,
}

impl ResolvedConfig {
    /// Compiled-in default: enabled, auto selection, auto-degrade.
    #[must_use]
    pub fn default_enabled() -> Self {
        Self {
            enabled: true,
            selection: BackendSelection::Auto,
            fallback: FallbackPolicy::AutoDegrade,
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            selection: BackendSelection::Auto,
            fallback: FallbackPolicy::AutoDegrade,
        }
    }
}

impl SubstitutionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Disable every component unless a higher-precedence level re-enables it.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            global: Switch::Disabled,
            components: BTreeMap::new(),
        }
    }

    /// Set the per-component switch.
    pub fn set_component(&mut self, component: impl Into<String>, switch: Switch) -> &mut Self {
        self.components.insert(component.into(), switch);
        self
    }

    /// Resolve the effective configuration for `component` under the given
    /// call-time overrides.
    #[must_use]
    pub fn resolve(&self, component: &str, overrides: &Overrides) -> ResolvedConfig {
        if let Some(forced) = overrides.get(component) {
            return match forced {
                Override::Disable => ResolvedConfig::disabled(),
                Override::ForcePreferred => ResolvedConfig {
                    enabled: true,
                    selection: BackendSelection::ForcePreferred,
                    fallback: FallbackPolicy::Propagate,
                },
                Override::ForceReference => ResolvedConfig {
                    enabled: true,
                    selection: BackendSelection::ForceReference,
                    fallback: FallbackPolicy::AutoDegrade,
                },
            };
        }

        let component_switch = self
            .components
            .get(component)
            .copied()
            .unwrap_or(Switch::Auto);
        let enabled = match component_switch {
            Switch::Enabled => true,
            Switch::Disabled => false,
            Switch::Auto => match self.global {
                Switch::Enabled | Switch::Auto => true,
                Switch::Disabled => false,
            },
        };

        if enabled {
            ResolvedConfig::default_enabled()
        } else {
            ResolvedConfig::disabled()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
