//! Error taxonomy for the substitution runtime.
//!
//! Two surfaces are kept deliberately separate:
//!
//! - [`ShimError`] covers the administrative surface (registration,
//!   activation, restoration). Integrity violations here are fatal and are
//!   surfaced immediately rather than absorbed.
//! - [`CapabilityError`] covers calls flowing through an adapter to a
//!   backend. Its [`CapabilityErrorKind`] drives the fallback decision:
//!   only backend-capability faults may trigger a degrade transition,
//!   caller misuse never does.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Error codes
// ---------------------------------------------------------------------------

pub mod error_codes {
    /// ERR_SHIM_DUPLICATE_COMPONENT: a component name was registered twice.
    pub const ERR_SHIM_DUPLICATE_COMPONENT: &str = "ERR_SHIM_DUPLICATE_COMPONENT";
    /// ERR_SHIM_UNKNOWN_COMPONENT: lookup of an unregistered component.
    pub const ERR_SHIM_UNKNOWN_COMPONENT: &str = "ERR_SHIM_UNKNOWN_COMPONENT";
    /// ERR_SHIM_BACKEND_UNAVAILABLE: preferred backend failed its
    /// construction probe while the configuration forced the preferred path.
    pub const ERR_SHIM_BACKEND_UNAVAILABLE: &str = "ERR_SHIM_BACKEND_UNAVAILABLE";
    /// ERR_SHIM_RESTORE_INCONSISTENCY: a component is marked active but no
    /// backup of the original symbol exists.
    pub const ERR_SHIM_RESTORE_INCONSISTENCY: &str = "ERR_SHIM_RESTORE_INCONSISTENCY";
    /// ERR_SHIM_UNBOUND_TARGET: install/restore addressed a target location
    /// that was never bound and has no registered loader.
    pub const ERR_SHIM_UNBOUND_TARGET: &str = "ERR_SHIM_UNBOUND_TARGET";
}

// ---------------------------------------------------------------------------
// Administrative errors
// ---------------------------------------------------------------------------

/// Errors raised by the registry, binding table, and activation controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShimError {
    #[error(
        "{}: component `{component}` is already registered",
        error_codes::ERR_SHIM_DUPLICATE_COMPONENT
    )]
    DuplicateComponent { component: String },

    #[error(
        "{}: component `{component}` is not registered",
        error_codes::ERR_SHIM_UNKNOWN_COMPONENT
    )]
    UnknownComponent { component: String },

    #[error(
        "{}: preferred backend for `{component}` could not be constructed: {detail}",
        error_codes::ERR_SHIM_BACKEND_UNAVAILABLE
    )]
    BackendUnavailable { component: String, detail: String },

    #[error(
        "{}: component `{component}` is marked active but no backup of the \
         original symbol exists",
        error_codes::ERR_SHIM_RESTORE_INCONSISTENCY
    )]
    RestoreInconsistency { component: String },

    #[error(
        "{}: no binding or loader at `{target}`",
        error_codes::ERR_SHIM_UNBOUND_TARGET
    )]
    UnboundTarget { target: String },
}

impl ShimError {
    /// Stable error-code string for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateComponent { .. } => error_codes::ERR_SHIM_DUPLICATE_COMPONENT,
            Self::UnknownComponent { .. } => error_codes::ERR_SHIM_UNKNOWN_COMPONENT,
            Self::BackendUnavailable { .. } => error_codes::ERR_SHIM_BACKEND_UNAVAILABLE,
            Self::RestoreInconsistency { .. } => error_codes::ERR_SHIM_RESTORE_INCONSISTENCY,
            Self::UnboundTarget { .. } => error_codes::ERR_SHIM_UNBOUND_TARGET,
        }
    }
}

// ---------------------------------------------------------------------------
// Capability-call errors
// ---------------------------------------------------------------------------

/// Classification of a capability-call failure.
///
/// The kind, not the message, decides fallback behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityErrorKind {
    /// Non-fatal backend-capability fault. The operation was valid but the
    /// backend could not perform it; the reference backend may succeed.
    Backend,
    /// Caller-supplied arguments violate the capability contract. Retrying
    /// on the reference backend would fail identically, so this kind never
    /// triggers fallback.
    CallerInput,
    /// The backend could not be constructed or is not present in this
    /// environment. Raised at probe time, absorbed by auto selection.
    Unavailable,
}

impl fmt::Display for CapabilityErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::CallerInput => write!(f, "caller_input"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Failure of one capability operation on one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CapabilityError {
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    /// Non-fatal backend-capability fault.
    pub fn backend(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Backend,
            message: message.into(),
        }
    }

    /// Caller misuse per the capability contract.
    pub fn caller_input(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::CallerInput,
            message: message.into(),
        }
    }

    /// Backend absent or unconstructible in this environment.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: CapabilityErrorKind::Unavailable,
            message: message.into(),
        }
    }

    /// Whether this failure is allowed to trigger a degrade transition.
    ///
    /// Only the backend-capability class qualifies. Caller misuse recurs
    /// identically on the reference backend, and unavailability is a
    /// construction-time condition handled by the activation probe.
    #[must_use]
    pub fn is_fallback_trigger(&self) -> bool {
        self.kind == CapabilityErrorKind::Backend
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
