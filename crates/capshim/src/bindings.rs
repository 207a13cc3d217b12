//! Indirection table standing in for host-namespace rewriting.
//!
//! Instead of physically overwriting a symbol in another module, the host
//! publishes each well-known symbol into a [`BindingTable`] and resolves it
//! through [`BindingTable::resolve`]. Substitution then becomes an atomic
//! swap of the table entry, and rollback a verbatim write-back of the
//! previous handle.
//!
//! A namespace that has not been observed yet is covered by
//! [`BindingTable::bind_deferred`]: the loader materializes the original on
//! first observation, and [`BindingTable::install`] forces the loader
//! first, so a substitution installed before first observation is already
//! in place when any caller resolves the name.
//!
//! # Known limitation
//!
//! A caller that resolved a target before activation and kept a clone of
//! the returned [`SymbolHandle`] (or of the `Arc` inside it) holds the
//! original implementation for as long as it keeps that clone. The runtime
//! does not chase cached references; re-resolve after activation to observe
//! the substitute.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::ShimError;
use crate::registry::TargetLocation;

// ---------------------------------------------------------------------------
// Symbol handles
// ---------------------------------------------------------------------------

/// Type-erased, cheaply cloneable handle to one installed implementation.
///
/// Identity (not equality) is what restoration guarantees: deactivation
/// puts back a handle for which [`SymbolHandle::same_symbol`] holds against
/// the pre-activation one.
#[derive(Clone)]
pub struct SymbolHandle {
    inner: Arc<dyn Any + Send + Sync>,
}

impl SymbolHandle {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }

    /// Recover the concrete type the handle was created with.
    #[must_use]
    pub fn downcast<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.inner).downcast::<T>().ok()
    }

    /// Whether two handles point at the same installed object.
    #[must_use]
    pub fn same_symbol(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

impl fmt::Debug for SymbolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolHandle")
            .field("type_id", &self.inner.type_id())
            .finish()
    }
}

/// Produces the original symbol for a deferred binding on first observation.
pub type SymbolLoader = Box<dyn Fn() -> SymbolHandle + Send + Sync>;

enum Slot {
    /// Namespace not observed yet; the loader yields the original.
    Deferred(SymbolLoader),
    Bound(SymbolHandle),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred(_) => f.write_str("Deferred"),
            Self::Bound(handle) => f.debug_tuple("Bound").field(handle).finish(),
        }
    }
}

// ---------------------------------------------------------------------------
// Binding table
// ---------------------------------------------------------------------------

/// Process-scope mapping from target locations to installed handles.
///
/// Reads take the read lock only; `install`/`restore` and the one-time
/// materialization of a deferred slot take the write lock. Loaders run
/// under the write lock and must not call back into the table.
#[derive(Debug, Default)]
pub struct BindingTable {
    slots: RwLock<BTreeMap<TargetLocation, Slot>>,
}

impl BindingTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an already-materialized symbol at `target`.
    pub fn bind(&self, target: TargetLocation, handle: SymbolHandle) {
        self.write().insert(target, Slot::Bound(handle));
    }

    /// Register a loader for a target whose namespace has not been loaded
    /// yet. The loader runs at most once, at first observation or at
    /// install time, whichever comes first.
    pub fn bind_deferred(&self, target: TargetLocation, loader: SymbolLoader) {
        self.write().insert(target, Slot::Deferred(loader));
    }

    /// Whether any slot (bound or deferred) exists at `target`.
    #[must_use]
    pub fn is_bound(&self, target: &TargetLocation) -> bool {
        self.read().contains_key(target)
    }

    /// Resolve the handle currently installed at `target`, materializing a
    /// deferred slot on first observation.
    pub fn resolve(&self, target: &TargetLocation) -> Result<SymbolHandle, ShimError> {
        {
            let slots = self.read();
            match slots.get(target) {
                Some(Slot::Bound(handle)) => return Ok(handle.clone()),
                Some(Slot::Deferred(_)) => {}
                None => {
                    return Err(ShimError::UnboundTarget {
                        target: target.to_string(),
                    })
                }
            }
        }
        let mut slots = self.write();
        // Another thread may have materialized the slot between the locks.
        let handle = match slots.get(target) {
            Some(Slot::Bound(handle)) => return Ok(handle.clone()),
            Some(Slot::Deferred(loader)) => loader(),
            None => {
                return Err(ShimError::UnboundTarget {
                    target: target.to_string(),
                })
            }
        };
        slots.insert(target.clone(), Slot::Bound(handle.clone()));
        Ok(handle)
    }

    /// Swap `new_handle` in at `target` and return what was previously
    /// installed there, materializing a deferred original first so the
    /// backup always captures the true pre-substitution symbol.
    pub fn install(
        &self,
        target: &TargetLocation,
        new_handle: SymbolHandle,
    ) -> Result<SymbolHandle, ShimError> {
        let mut slots = self.write();
        let original = match slots.get(target) {
            Some(Slot::Bound(handle)) => handle.clone(),
            Some(Slot::Deferred(loader)) => loader(),
            None => {
                return Err(ShimError::UnboundTarget {
                    target: target.to_string(),
                })
            }
        };
        slots.insert(target.clone(), Slot::Bound(new_handle));
        Ok(original)
    }

    /// Write `original` back verbatim at `target`.
    pub fn restore(
        &self,
        target: &TargetLocation,
        original: SymbolHandle,
    ) -> Result<(), ShimError> {
        let mut slots = self.write();
        if !slots.contains_key(target) {
            return Err(ShimError::UnboundTarget {
                target: target.to_string(),
            });
        }
        slots.insert(target.clone(), Slot::Bound(original));
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<TargetLocation, Slot>> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<TargetLocation, Slot>> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
