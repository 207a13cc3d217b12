//! Worked capability contract and backend doubles.
//!
//! The runtime treats backends as opaque collaborators behind a contract;
//! this module provides the one worked example used across the test suite:
//! a key-value storage contract, an in-memory reference backend, a
//! configurable faulty backend, and [`StoreAdapter`] showing how a host
//! makes [`CapabilityAdapter`] a drop-in implementation of the contract.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::adapter::{AdapterControl, BuiltAdapter, CapabilityAdapter};
use crate::bindings::SymbolHandle;
use crate::error::{CapabilityError, CapabilityErrorKind};
use crate::registry::{PatchDescriptor, TargetLocation};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The key-value capability contract. Both backends and the adapter
/// implement it with identical observable behavior on success.
///
/// Contract rule: an empty key is caller misuse and fails with
/// [`CapabilityErrorKind::CallerInput`] on every conforming backend.
pub trait KeyValueStore: Send + Sync {
    fn store(&self, key: &str, value: Value) -> Result<(), CapabilityError>;
    fn retrieve(&self, key: &str) -> Result<Option<Value>, CapabilityError>;
    fn delete(&self, key: &str) -> Result<bool, CapabilityError>;
    fn len(&self) -> Result<usize, CapabilityError>;
}

fn check_key(key: &str) -> Result<(), CapabilityError> {
    if key.is_empty() {
        return Err(CapabilityError::caller_input("key must not be empty"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reference backend
// ---------------------------------------------------------------------------

/// Baseline backend: a locked map. This is the floor every degrade lands on.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for InMemoryStore {
    fn store(&self, key: &str, value: Value) -> Result<(), CapabilityError> {
        check_key(key)?;
        self.entries().insert(key.to_string(), value);
        Ok(())
    }

    fn retrieve(&self, key: &str) -> Result<Option<Value>, CapabilityError> {
        check_key(key)?;
        Ok(self.entries().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<bool, CapabilityError> {
        check_key(key)?;
        Ok(self.entries().remove(key).is_some())
    }

    fn len(&self) -> Result<usize, CapabilityError> {
        Ok(self.entries().len())
    }
}

// ---------------------------------------------------------------------------
// Faulty backend double
// ---------------------------------------------------------------------------

/// Backend that fails its first `failures` calls with the configured error
/// kind, then behaves like [`InMemoryStore`]. `usize::MAX` means "always
/// fail".
#[derive(Debug)]
pub struct FaultyStore {
    remaining_failures: AtomicUsize,
    kind: CapabilityErrorKind,
    inner: InMemoryStore,
}

impl FaultyStore {
    #[must_use]
    pub fn new(failures: usize, kind: CapabilityErrorKind) -> Self {
        Self {
            remaining_failures: AtomicUsize::new(failures),
            kind,
            inner: InMemoryStore::new(),
        }
    }

    #[must_use]
    pub fn always(kind: CapabilityErrorKind) -> Self {
        Self::new(usize::MAX, kind)
    }

    fn take_failure(&self) -> Option<CapabilityError> {
        // One atomic step: a finite budget is decremented exactly once per
        // taken failure even when callers race, and never wraps past zero.
        let taken = self
            .remaining_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                if remaining == 0 {
                    None
                } else if remaining == usize::MAX {
                    Some(remaining)
                } else {
                    Some(remaining - 1)
                }
            })
            .is_ok();
        if !taken {
            return None;
        }
        Some(CapabilityError {
            kind: self.kind,
            message: "injected fault".to_string(),
        })
    }
}

impl KeyValueStore for FaultyStore {
    fn store(&self, key: &str, value: Value) -> Result<(), CapabilityError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inner.store(key, value)
    }

    fn retrieve(&self, key: &str) -> Result<Option<Value>, CapabilityError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inner.retrieve(key)
    }

    fn delete(&self, key: &str) -> Result<bool, CapabilityError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inner.delete(key)
    }

    fn len(&self) -> Result<usize, CapabilityError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        self.inner.len()
    }
}

// ---------------------------------------------------------------------------
// Adapter as a drop-in contract implementation
// ---------------------------------------------------------------------------

/// The substituted symbol for key-value components: implements the contract
/// by routing every operation through the adapter's dispatch, so callers
/// cannot tell it apart from either backend alone.
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<CapabilityAdapter<dyn KeyValueStore>>,
}

impl StoreAdapter {
    #[must_use]
    pub fn from_arc(inner: Arc<CapabilityAdapter<dyn KeyValueStore>>) -> Self {
        Self { inner }
    }

    /// Control surface of the wrapped adapter.
    #[must_use]
    pub fn control(&self) -> Arc<dyn AdapterControl> {
        Arc::clone(&self.inner) as Arc<dyn AdapterControl>
    }
}

impl KeyValueStore for StoreAdapter {
    fn store(&self, key: &str, value: Value) -> Result<(), CapabilityError> {
        self.inner
            .dispatch("store", |backend| backend.store(key, value.clone()))
    }

    fn retrieve(&self, key: &str) -> Result<Option<Value>, CapabilityError> {
        self.inner
            .dispatch("retrieve", |backend| backend.retrieve(key))
    }

    fn delete(&self, key: &str) -> Result<bool, CapabilityError> {
        self.inner.dispatch("delete", |backend| backend.delete(key))
    }

    fn len(&self) -> Result<usize, CapabilityError> {
        self.inner.dispatch("len", |backend| backend.len())
    }
}

impl std::fmt::Debug for StoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreAdapter")
            .field("component", &self.inner.component_name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Descriptor helpers
// ---------------------------------------------------------------------------

/// Ready-made descriptor for a key-value component whose preferred backend
/// comes from `preferred_probe` and whose reference backend is an
/// [`InMemoryStore`].
pub fn kv_descriptor<F>(
    component: &str,
    target: TargetLocation,
    preferred_probe: F,
) -> PatchDescriptor
where
    F: Fn() -> Result<Box<dyn KeyValueStore>, CapabilityError> + Send + Sync + 'static,
{
    let name = component.to_string();
    PatchDescriptor::new(component, target, move |resolved, events| {
        let adapter: Arc<CapabilityAdapter<dyn KeyValueStore>> =
            Arc::new(CapabilityAdapter::from_probe(
                name.clone(),
                &preferred_probe,
                Box::new(|| Box::new(InMemoryStore::new()) as Box<dyn KeyValueStore>),
                resolved,
                events.clone(),
            )?);
        Ok(BuiltAdapter {
            handle: SymbolHandle::new(StoreAdapter::from_arc(Arc::clone(&adapter))),
            control: adapter,
        })
    })
}

/// Descriptor whose factory itself fails, for exercising the partial
/// activation path.
pub fn failing_descriptor(component: &str, target: TargetLocation) -> PatchDescriptor {
    let name = component.to_string();
    PatchDescriptor::new(component, target, move |_resolved, _events| {
        Err(crate::error::ShimError::BackendUnavailable {
            component: name.clone(),
            detail: "factory always fails".to_string(),
        })
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_store_round_trip() {
        let store = InMemoryStore::new();
        store.store("alpha", json!(1)).unwrap();
        store.store("beta", json!({"x": true})).unwrap();
        assert_eq!(store.retrieve("alpha").unwrap(), Some(json!(1)));
        assert_eq!(store.len().unwrap(), 2);
        assert!(store.delete("alpha").unwrap());
        assert!(!store.delete("alpha").unwrap());
        assert_eq!(store.retrieve("alpha").unwrap(), None);
    }

    #[test]
    fn empty_key_is_caller_input() {
        let store = InMemoryStore::new();
        let err = store.store("", json!(1)).unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::CallerInput);
        let err = store.retrieve("").unwrap_err();
        assert_eq!(err.kind, CapabilityErrorKind::CallerInput);
    }

    #[test]
    fn faulty_store_counts_down_then_recovers() {
        let store = FaultyStore::new(2, CapabilityErrorKind::Backend);
        assert!(store.retrieve("k").is_err());
        assert!(store.retrieve("k").is_err());
        assert_eq!(store.retrieve("k").unwrap(), None);
    }

    #[test]
    fn concurrent_callers_spend_the_exact_fault_budget() {
        let store = FaultyStore::new(8, CapabilityErrorKind::Backend);
        let failures = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..16 {
                        if store.len().is_err() {
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });
        // Exactly the budget failed; the exhausted counter never wraps into
        // the always-fail sentinel.
        assert_eq!(failures.load(Ordering::Relaxed), 8);
        assert!(store.len().is_ok());
    }

    #[test]
    fn always_faulty_store_never_recovers() {
        let store = FaultyStore::always(CapabilityErrorKind::Backend);
        for _ in 0..64 {
            assert!(store.len().is_err());
        }
    }
}
