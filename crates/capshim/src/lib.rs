//! Transparent capability-substitution runtime.
//!
//! A host keeps using a stable set of component names while capshim swaps
//! the implementation behind them between a preferred ("fast") backend and
//! a reference ("safe") backend, with per-component enable/disable control,
//! idempotent activation, exact rollback, and sticky degrade-on-failure.
//!
//! The moving parts, leaves first:
//!
//! - [`registry::PatchRegistry`] — declarative catalog of substitution
//!   points.
//! - [`config::SubstitutionConfig`] — layered enablement: call-time
//!   override, per-component switch, global switch, compiled-in default.
//! - [`adapter::CapabilityAdapter`] — one preferred and one reference
//!   backend behind a single contract, with atomic degrade-on-failure.
//! - [`activation::ShimRuntime`] — coordinated, idempotent apply/revert of
//!   all registered patches, plus `status()` and `reset()`.
//! - [`bindings::BindingTable`] — the indirection table standing in for
//!   host-namespace rewriting; callers resolve well-known names through it
//!   and transparently receive the adapter while substitution is active.
//!
//! Diagnostics are structured [`events::RuntimeEvent`] records (one per
//! activation outcome per component, exactly one per degrade transition),
//! mirrored to `tracing`.
//!
//! # Known limitation
//!
//! A caller that resolved a target before activation and cached the handle
//! keeps the original implementation; see [`bindings`] for details. The
//! runtime also imposes no timeouts of its own: a slow preferred-backend
//! call is the backend's responsibility.

#![forbid(unsafe_code)]

pub mod activation;
pub mod adapter;
pub mod bindings;
pub mod config;
pub mod error;
pub mod events;
pub mod registry;
pub mod testing;

pub use activation::{ActivationReport, ComponentStatus, ShimRuntime};
pub use adapter::{AdapterControl, BackendKind, BuiltAdapter, CapabilityAdapter, ReferenceBuilder};
pub use bindings::{BindingTable, SymbolHandle, SymbolLoader};
pub use config::{
    BackendSelection, FallbackPolicy, Override, Overrides, ResolvedConfig, SubstitutionConfig,
    Switch,
};
pub use error::{CapabilityError, CapabilityErrorKind, ShimError};
pub use events::{EventLog, RuntimeEvent};
pub use registry::{PatchDescriptor, PatchRegistry, TargetLocation};
