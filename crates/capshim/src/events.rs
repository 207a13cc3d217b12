//! Structured diagnostic events for substitution lifecycle transitions.
//!
//! Every activation outcome, degrade transition, and reset produces exactly
//! one [`RuntimeEvent`] in the shared [`EventLog`], mirrored to `tracing`.
//! The log is the only diagnostic channel the runtime owns; it performs no
//! network or disk I/O.
//!
//! # Event Codes
//!
//! - **SUB-001**: replacement installed for a component.
//! - **SUB-002**: component skipped because configuration disables it.
//! - **SUB-003**: activation no-op, component already active.
//! - **SUB-004**: activation failed for a component.
//! - **SUB-005**: original symbol restored for a component.
//! - **SUB-006**: deactivation no-op, component was not active.
//! - **SUB-007**: adapter degraded from preferred to reference backend.
//! - **SUB-008**: preferred backend unavailable at the construction probe.
//! - **SUB-009**: degrade flag cleared by an operator reset.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Event codes
// ---------------------------------------------------------------------------

pub mod event_codes {
    /// SUB-001: replacement installed for a component.
    pub const COMPONENT_APPLIED: &str = "SUB-001";
    /// SUB-002: component skipped, disabled by configuration.
    pub const COMPONENT_SKIPPED_DISABLED: &str = "SUB-002";
    /// SUB-003: activation no-op, component already active.
    pub const COMPONENT_ALREADY_ACTIVE: &str = "SUB-003";
    /// SUB-004: activation failed for a component.
    pub const COMPONENT_ACTIVATION_FAILED: &str = "SUB-004";
    /// SUB-005: original symbol restored.
    pub const COMPONENT_RESTORED: &str = "SUB-005";
    /// SUB-006: deactivation no-op, component not active.
    pub const COMPONENT_DEACTIVATE_NOOP: &str = "SUB-006";
    /// SUB-007: adapter degraded to the reference backend.
    pub const ADAPTER_DEGRADED: &str = "SUB-007";
    /// SUB-008: preferred backend unavailable at the construction probe.
    pub const PREFERRED_UNAVAILABLE: &str = "SUB-008";
    /// SUB-009: degrade flag cleared by reset.
    pub const ADAPTER_RESET: &str = "SUB-009";
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One diagnostic record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    /// Stable event code (`SUB-xxx`).
    pub event_code: String,
    /// Logical component the event concerns.
    pub component: String,
    /// Free-form detail, `key=value` style.
    pub detail: String,
    /// Error classification, present on failure and degrade events.
    pub error_kind: Option<String>,
    /// Epoch milliseconds, stamped at emission.
    pub timestamp_ms: i64,
}

/// Shared, append-only diagnostic log.
///
/// Cheap to clone; all clones append to the same buffer. Adapters hold a
/// clone so the degrade hot path never touches the activation lock.
#[derive(Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<Vec<RuntimeEvent>>>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event and mirror it to `tracing`.
    pub fn emit(
        &self,
        event_code: &str,
        component: &str,
        detail: impl Into<String>,
        error_kind: Option<String>,
    ) {
        let detail = detail.into();
        match event_code {
            event_codes::ADAPTER_DEGRADED
            | event_codes::COMPONENT_ACTIVATION_FAILED
            | event_codes::PREFERRED_UNAVAILABLE => {
                tracing::warn!(event_code, component, %detail, ?error_kind, "substitution event");
            }
            _ => {
                tracing::info!(event_code, component, %detail, "substitution event");
            }
        }
        let event = RuntimeEvent {
            event_code: event_code.to_string(),
            component: component.to_string(),
            detail,
            error_kind,
            timestamp_ms: Utc::now().timestamp_millis(),
        };
        self.lock().push(event);
    }

    /// Copy of all events emitted so far, in emission order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RuntimeEvent> {
        self.lock().clone()
    }

    /// Remove and return all events emitted so far.
    pub fn drain(&self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of events carrying the given code.
    #[must_use]
    pub fn count(&self, event_code: &str) -> usize {
        self.lock()
            .iter()
            .filter(|e| e.event_code == event_code)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RuntimeEvent>> {
        // A panic while holding the guard poisons the mutex; the log is
        // still structurally sound, so keep appending.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("events", &self.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
