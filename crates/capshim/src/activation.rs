//! Activation controller: coordinated, idempotent apply/revert of every
//! registered patch.
//!
//! [`ShimRuntime`] is an explicit context object; its owner decides the
//! lifetime of all substitutions. Administrative operations (`activate`,
//! `deactivate*`, `reset`) serialize on one state lock. `status()` and
//! capability calls through installed adapters take no write lock, so the
//! hot path never queues behind administration once activation has
//! stabilized.
//!
//! Per component the state machine is `Inactive -> Active -> Inactive`.
//! There is no visible active-but-broken state: a factory that fails
//! during activation leaves its component inactive and is reported in the
//! [`ActivationReport`] while the remaining components proceed.
//!
//! # Invariants
//!
//! - Activation is idempotent: a second `activate()` is a per-component
//!   no-op that never overwrites an existing backup.
//! - Every applied component has a backup of the exact pre-activation
//!   handle; deactivation restores that handle by identity.
//! - An applied component without a backup is a broken invariant and
//!   surfaces as [`ShimError::RestoreInconsistency`] instead of limping.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::adapter::{AdapterControl, BackendKind};
use crate::bindings::{BindingTable, SymbolHandle};
use crate::config::{Overrides, SubstitutionConfig};
use crate::error::ShimError;
use crate::events::{event_codes, EventLog};
use crate::registry::PatchRegistry;

// ---------------------------------------------------------------------------
// Reports and status
// ---------------------------------------------------------------------------

/// Per-component outcome summary of one `activate()` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    /// Components newly substituted by this call, in registration order.
    pub activated: Vec<String>,
    /// Components that were already active (idempotent no-ops).
    pub already_active: Vec<String>,
    /// Components skipped because configuration disables them.
    pub skipped: Vec<String>,
    /// Components that failed to activate, with the failure rendered.
    pub failed: BTreeMap<String, String>,
}

impl ActivationReport {
    /// Whether every component either activated or was already active.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Externally visible state of one registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub active: bool,
    /// Backend currently serving calls; [`BackendKind::Unavailable`] when
    /// the component is not active.
    pub backend: BackendKind,
    pub degraded: bool,
}

// ---------------------------------------------------------------------------
// Activation state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ActivationState {
    /// Backups of pre-substitution handles, captured at first activation.
    original_symbols: BTreeMap<String, SymbolHandle>,
    /// Control surfaces of currently applied adapters.
    applied: BTreeMap<String, Arc<dyn AdapterControl>>,
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

/// The substitution runtime: registry, binding table, configuration, and
/// activation state under one roof.
pub struct ShimRuntime {
    registry: PatchRegistry,
    bindings: BindingTable,
    config: SubstitutionConfig,
    state: RwLock<ActivationState>,
    events: EventLog,
}

impl ShimRuntime {
    #[must_use]
    pub fn new(registry: PatchRegistry, config: SubstitutionConfig) -> Self {
        Self {
            registry,
            bindings: BindingTable::new(),
            config,
            state: RwLock::new(ActivationState::default()),
            events: EventLog::new(),
        }
    }

    /// Empty-registry runtime with default configuration, for hosts that
    /// register nothing and only want the binding table.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PatchRegistry::new(), SubstitutionConfig::default())
    }

    #[must_use]
    pub fn registry(&self) -> &PatchRegistry {
        &self.registry
    }

    /// The indirection table hosts bind and resolve well-known symbols
    /// through.
    #[must_use]
    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    /// Diagnostic stream: one event per activation outcome per component,
    /// one per degrade transition, one per reset.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Activate every registered component permitted by configuration.
    pub fn activate(&self) -> ActivationReport {
        self.activate_with(&Overrides::new())
    }

    /// Activate with call-time overrides, best-effort per component.
    ///
    /// Components already active are no-ops; the backup captured at their
    /// first activation is never overwritten, so double activation cannot
    /// wrap an adapter in another adapter or corrupt rollback state.
    pub fn activate_with(&self, overrides: &Overrides) -> ActivationReport {
        let mut state = self.write_state();
        let mut report = ActivationReport::default();

        for descriptor in self.registry.list() {
            let name = descriptor.component_name();

            if state.applied.contains_key(name) {
                self.events.emit(
                    event_codes::COMPONENT_ALREADY_ACTIVE,
                    name,
                    "activation no-op",
                    None,
                );
                report.already_active.push(name.to_string());
                continue;
            }

            let resolved = self.config.resolve(name, overrides);
            if !resolved.enabled {
                self.events.emit(
                    event_codes::COMPONENT_SKIPPED_DISABLED,
                    name,
                    "disabled by configuration",
                    None,
                );
                report.skipped.push(name.to_string());
                continue;
            }

            let built = match descriptor.build(&resolved, &self.events) {
                Ok(built) => built,
                Err(err) => {
                    self.events.emit(
                        event_codes::COMPONENT_ACTIVATION_FAILED,
                        name,
                        format!("factory failed: {err}"),
                        Some(err.code().to_string()),
                    );
                    report.failed.insert(name.to_string(), err.to_string());
                    continue;
                }
            };

            let original = match self.bindings.install(descriptor.target_location(), built.handle)
            {
                Ok(original) => original,
                Err(err) => {
                    self.events.emit(
                        event_codes::COMPONENT_ACTIVATION_FAILED,
                        name,
                        format!("install failed: {err}"),
                        Some(err.code().to_string()),
                    );
                    report.failed.insert(name.to_string(), err.to_string());
                    continue;
                }
            };

            state
                .original_symbols
                .entry(name.to_string())
                .or_insert(original);
            state.applied.insert(name.to_string(), built.control);
            self.events.emit(
                event_codes::COMPONENT_APPLIED,
                name,
                format!("target={}", descriptor.target_location()),
                None,
            );
            report.activated.push(name.to_string());
        }

        report
    }

    /// Restore the original symbols for the named components. Deactivating
    /// an inactive component is a no-op; unknown names are errors.
    pub fn deactivate(&self, component_names: &[&str]) -> Result<Vec<String>, ShimError> {
        let mut state = self.write_state();
        let mut restored = Vec::new();

        for &name in component_names {
            let descriptor = self.registry.find(name)?;

            if !state.applied.contains_key(name) {
                self.events.emit(
                    event_codes::COMPONENT_DEACTIVATE_NOOP,
                    name,
                    "not active",
                    None,
                );
                continue;
            }

            // Clone the backup first; it leaves the map only after the
            // restore has actually happened.
            let original = state.original_symbols.get(name).cloned().ok_or_else(|| {
                ShimError::RestoreInconsistency {
                    component: name.to_string(),
                }
            })?;
            self.bindings
                .restore(descriptor.target_location(), original)?;
            state.original_symbols.remove(name);
            state.applied.remove(name);
            self.events.emit(
                event_codes::COMPONENT_RESTORED,
                name,
                format!("target={}", descriptor.target_location()),
                None,
            );
            restored.push(name.to_string());
        }

        if state.applied.is_empty() {
            // Full deactivation tears the backup map down entirely.
            state.original_symbols.clear();
        }
        Ok(restored)
    }

    /// Restore every currently active component.
    pub fn deactivate_all(&self) -> Result<Vec<String>, ShimError> {
        let active: Vec<String> = {
            let state = self.read_state();
            state.applied.keys().cloned().collect()
        };
        let names: Vec<&str> = active.iter().map(String::as_str).collect();
        self.deactivate(&names)
    }

    /// Status of every registered component, keyed by component name.
    #[must_use]
    pub fn status(&self) -> BTreeMap<String, ComponentStatus> {
        let state = self.read_state();
        self.registry
            .list()
            .iter()
            .map(|descriptor| {
                let name = descriptor.component_name();
                let status = match state.applied.get(name) {
                    Some(control) => ComponentStatus {
                        active: true,
                        backend: control.active_backend(),
                        degraded: control.is_degraded(),
                    },
                    None => ComponentStatus {
                        active: false,
                        backend: BackendKind::Unavailable,
                        degraded: false,
                    },
                };
                (name.to_string(), status)
            })
            .collect()
    }

    /// Status of one registered component.
    pub fn component_status(&self, component_name: &str) -> Result<ComponentStatus, ShimError> {
        self.registry.find(component_name)?;
        let state = self.read_state();
        Ok(match state.applied.get(component_name) {
            Some(control) => ComponentStatus {
                active: true,
                backend: control.active_backend(),
                degraded: control.is_degraded(),
            },
            None => ComponentStatus {
                active: false,
                backend: BackendKind::Unavailable,
                degraded: false,
            },
        })
    }

    /// Clear the degrade flag on an active component's adapter so the
    /// preferred backend is retried. Returns `false` when the component is
    /// registered but not active.
    pub fn reset(&self, component_name: &str) -> Result<bool, ShimError> {
        self.registry.find(component_name)?;
        let state = self.write_state();
        match state.applied.get(component_name) {
            Some(control) => {
                control.reset();
                self.events.emit(
                    event_codes::ADAPTER_RESET,
                    component_name,
                    "degrade flag cleared",
                    None,
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether any component is currently substituted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.read_state().applied.is_empty()
    }

    /// Test hook: discard the stored backup of an applied component,
    /// putting the state into the broken shape restoration must detect.
    #[cfg(test)]
    fn discard_backup(&self, component_name: &str) {
        self.write_state().original_symbols.remove(component_name);
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ActivationState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ActivationState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ShimRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read_state();
        f.debug_struct("ShimRuntime")
            .field("registered", &self.registry.len())
            .field("applied", &state.applied.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Override, Switch};
    use crate::error::CapabilityError;
    use crate::registry::TargetLocation;
    use crate::testing::{kv_descriptor, InMemoryStore, KeyValueStore};

    fn kv_target(namespace: &str) -> TargetLocation {
        TargetLocation::new(namespace, "Store")
    }

    /// Runtime with one healthy key-value component bound at `host::memory`.
    fn runtime_with_store(config: SubstitutionConfig) -> ShimRuntime {
        let mut registry = PatchRegistry::new();
        registry
            .register(kv_descriptor("memory-store", kv_target("host::memory"), || {
                Ok(Box::new(InMemoryStore::new()))
            }))
            .unwrap();
        let runtime = ShimRuntime::new(registry, config);
        runtime
            .bindings()
            .bind(kv_target("host::memory"), SymbolHandle::new(InMemoryStore::new()));
        runtime
    }

    #[test]
    fn activate_installs_and_reports() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        let report = runtime.activate();
        assert_eq!(report.activated, vec!["memory-store".to_string()]);
        assert!(report.is_clean());
        assert!(runtime.is_active());

        let status = runtime.component_status("memory-store").unwrap();
        assert!(status.active);
        assert_eq!(status.backend, BackendKind::Preferred);
        assert!(!status.degraded);
    }

    #[test]
    fn double_activation_is_a_noop() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        runtime.activate();
        let before = runtime
            .bindings()
            .resolve(&kv_target("host::memory"))
            .unwrap();

        let report = runtime.activate();
        assert!(report.activated.is_empty());
        assert_eq!(report.already_active, vec!["memory-store".to_string()]);

        // The installed handle did not change: no adapter-in-adapter wrap.
        let after = runtime
            .bindings()
            .resolve(&kv_target("host::memory"))
            .unwrap();
        assert!(SymbolHandle::same_symbol(&before, &after));
        assert_eq!(
            runtime.events().count(event_codes::COMPONENT_ALREADY_ACTIVE),
            1
        );
    }

    #[test]
    fn deactivate_restores_symbol_identity() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        let original = runtime
            .bindings()
            .resolve(&kv_target("host::memory"))
            .unwrap();

        runtime.activate();
        let substituted = runtime
            .bindings()
            .resolve(&kv_target("host::memory"))
            .unwrap();
        assert!(!SymbolHandle::same_symbol(&original, &substituted));

        let restored = runtime.deactivate_all().unwrap();
        assert_eq!(restored, vec!["memory-store".to_string()]);
        let after = runtime
            .bindings()
            .resolve(&kv_target("host::memory"))
            .unwrap();
        assert!(SymbolHandle::same_symbol(&original, &after));
        assert!(!runtime.is_active());
    }

    #[test]
    fn deactivating_inactive_component_is_a_noop() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        let restored = runtime.deactivate(&["memory-store"]).unwrap();
        assert!(restored.is_empty());
        assert_eq!(
            runtime.events().count(event_codes::COMPONENT_DEACTIVATE_NOOP),
            1
        );
    }

    #[test]
    fn deactivating_unknown_component_errors() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        let err = runtime.deactivate(&["serializer"]).unwrap_err();
        assert!(matches!(err, ShimError::UnknownComponent { .. }));
    }

    #[test]
    fn applied_component_without_backup_fails_restore() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        runtime.activate();
        runtime.discard_backup("memory-store");

        let err = runtime.deactivate(&["memory-store"]).unwrap_err();
        assert!(matches!(err, ShimError::RestoreInconsistency { .. }));
        // No half-restore: the component is still reported as applied and
        // the installed adapter is untouched.
        assert!(runtime.is_active());
        assert!(runtime.component_status("memory-store").unwrap().active);
        assert_eq!(runtime.events().count(event_codes::COMPONENT_RESTORED), 0);
    }

    #[test]
    fn disabled_component_is_skipped() {
        let mut config = SubstitutionConfig::default();
        config.set_component("memory-store", Switch::Disabled);
        let runtime = runtime_with_store(config);

        let report = runtime.activate();
        assert_eq!(report.skipped, vec!["memory-store".to_string()]);
        assert!(!runtime.is_active());
        let status = runtime.component_status("memory-store").unwrap();
        assert!(!status.active);
        assert_eq!(status.backend, BackendKind::Unavailable);
    }

    #[test]
    fn call_time_disable_outranks_enabled_switch() {
        let mut config = SubstitutionConfig::default();
        config.set_component("memory-store", Switch::Enabled);
        let runtime = runtime_with_store(config);

        let mut overrides = Overrides::new();
        overrides.insert("memory-store".to_string(), Override::Disable);
        let report = runtime.activate_with(&overrides);
        assert_eq!(report.skipped, vec!["memory-store".to_string()]);
    }

    #[test]
    fn partial_activation_continues_past_failures() {
        let mut registry = PatchRegistry::new();
        registry
            .register(kv_descriptor(
                "broken",
                kv_target("host::broken"),
                || Err(CapabilityError::unavailable("simd missing")),
            ))
            .unwrap();
        registry
            .register(kv_descriptor("healthy", kv_target("host::healthy"), || {
                Ok(Box::new(InMemoryStore::new()))
            }))
            .unwrap();
        let runtime = ShimRuntime::new(registry, SubstitutionConfig::default());
        runtime
            .bindings()
            .bind(kv_target("host::healthy"), SymbolHandle::new(InMemoryStore::new()));
        // "broken" resolves its probe to reference-only mode under auto
        // selection, so a factory-level failure needs the install to fail:
        // leave host::broken unbound.

        let report = runtime.activate();
        assert_eq!(report.activated, vec!["healthy".to_string()]);
        assert!(report.failed.contains_key("broken"));
        assert!(runtime.component_status("healthy").unwrap().active);
        assert!(!runtime.component_status("broken").unwrap().active);
    }

    #[test]
    fn reset_clears_degraded_flag() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        runtime.activate();
        // Not degraded yet; reset is still a successful admin op.
        assert!(runtime.reset("memory-store").unwrap());
        assert_eq!(runtime.events().count(event_codes::ADAPTER_RESET), 1);
    }

    #[test]
    fn reset_on_inactive_component_returns_false() {
        let runtime = runtime_with_store(SubstitutionConfig::disabled());
        runtime.activate();
        assert!(!runtime.reset("memory-store").unwrap());
        let err = runtime.reset("serializer").unwrap_err();
        assert!(matches!(err, ShimError::UnknownComponent { .. }));
    }

    #[test]
    fn default_runtime_has_nothing_to_activate() {
        let runtime = ShimRuntime::with_defaults();
        let report = runtime.activate();
        assert_eq!(report, ActivationReport::default());
        assert!(!runtime.is_active());
    }

    #[test]
    fn status_covers_every_registered_component() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        runtime.activate();
        let status = runtime.status();
        assert_eq!(status.len(), 1);
        assert!(status["memory-store"].active);
    }

    #[test]
    fn substituted_store_answers_through_the_contract() {
        let runtime = runtime_with_store(SubstitutionConfig::default());
        runtime.activate();

        let handle = runtime
            .bindings()
            .resolve(&kv_target("host::memory"))
            .unwrap();
        let store = handle
            .downcast::<crate::testing::StoreAdapter>()
            .expect("substituted symbol is the adapter");
        store
            .store("alpha", serde_json::json!({"n": 1}))
            .unwrap();
        assert_eq!(
            store.retrieve("alpha").unwrap(),
            Some(serde_json::json!({"n": 1}))
        );
    }
}
