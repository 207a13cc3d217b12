//! Capability adapter: one preferred backend, one reference backend, one
//! sticky degrade flag.
//!
//! [`CapabilityAdapter`] is generic over the capability contract `C` (a
//! trait object type such as `dyn KeyValueStore`). Every contract operation
//! funnels through [`CapabilityAdapter::dispatch`], which implements the
//! per-call routing algorithm:
//!
//! 1. Degraded, or no preferred backend: route to the reference backend.
//! 2. Otherwise attempt the operation on the preferred backend.
//! 3. On a backend-capability fault under [`FallbackPolicy::AutoDegrade`]:
//!    flip the sticky degrade flag with a compare-and-set (the winning
//!    thread emits the one `SUB-007` diagnostic), then retry the call once
//!    on the reference backend and return its result untouched.
//! 4. Under [`FallbackPolicy::Propagate`]: surface the preferred-backend
//!    failure directly.
//!
//! Caller-input errors never reach step 3; they would recur identically on
//! the reference backend.
//!
//! Stickiness is deliberate: a native capability that fails once is taken
//! as unusable in this environment until an explicit
//! [`AdapterControl::reset`]. The runtime imposes no timeout of its own; a
//! slow or hung preferred-backend call is the backend's responsibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::config::{BackendSelection, FallbackPolicy, ResolvedConfig};
use crate::error::{CapabilityError, ShimError};
use crate::events::{event_codes, EventLog};

// ---------------------------------------------------------------------------
// Backend identity
// ---------------------------------------------------------------------------

/// Which backend is currently answering calls for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Preferred,
    Reference,
    /// No adapter is serving this component (it is not active).
    Unavailable,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preferred => write!(f, "preferred"),
            Self::Reference => write!(f, "reference"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Control surface
// ---------------------------------------------------------------------------

/// Status and reset surface the activation controller keeps for each
/// applied adapter. Callers of the substituted symbol never see this trait;
/// they see only the capability contract.
pub trait AdapterControl: Send + Sync {
    fn component_name(&self) -> &str;
    fn active_backend(&self) -> BackendKind;
    fn is_degraded(&self) -> bool;
    /// Clear the degrade flag so the preferred backend is retried, used
    /// after an external remediation.
    fn reset(&self);
}

/// What a replacement factory hands back to the activation controller: the
/// type-erased handle to install at the target location, plus the control
/// surface for `status()` and `reset()`.
pub struct BuiltAdapter {
    pub handle: crate::bindings::SymbolHandle,
    pub control: Arc<dyn AdapterControl>,
}

impl fmt::Debug for BuiltAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltAdapter")
            .field("component", &self.control.component_name())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Builds the reference backend on first use. Infallible: the reference
/// backend is the floor the whole degrade story lands on.
pub type ReferenceBuilder<C> = Box<dyn Fn() -> Box<C> + Send + Sync>;

/// Wrapper holding one optional preferred backend and one lazily-built
/// reference backend, both satisfying the contract `C`.
pub struct CapabilityAdapter<C: ?Sized + Send + Sync + 'static> {
    component: String,
    preferred: Option<Box<C>>,
    reference: OnceLock<Box<C>>,
    reference_builder: ReferenceBuilder<C>,
    degraded: AtomicBool,
    fallback: FallbackPolicy,
    events: EventLog,
}

impl<C: ?Sized + Send + Sync + 'static> CapabilityAdapter<C> {
    /// Construct with an already-probed preferred backend (`None` when the
    /// accelerated capability is unavailable).
    pub fn new(
        component: impl Into<String>,
        preferred: Option<Box<C>>,
        reference_builder: ReferenceBuilder<C>,
        fallback: FallbackPolicy,
        events: EventLog,
    ) -> Self {
        Self {
            component: component.into(),
            preferred,
            reference: OnceLock::new(),
            reference_builder,
            degraded: AtomicBool::new(false),
            fallback,
            events,
        }
    }

    /// Construct by running the preferred-backend probe according to the
    /// resolved configuration.
    ///
    /// Under [`BackendSelection::Auto`] a failed probe is expected in
    /// environments without the accelerated capability: it emits `SUB-008`
    /// and yields a reference-only adapter rather than an error. Under
    /// [`BackendSelection::ForcePreferred`] the same failure is an
    /// activation error. [`BackendSelection::ForceReference`] never runs
    /// the probe.
    pub fn from_probe(
        component: impl Into<String>,
        probe: impl FnOnce() -> Result<Box<C>, CapabilityError>,
        reference_builder: ReferenceBuilder<C>,
        resolved: &ResolvedConfig,
        events: EventLog,
    ) -> Result<Self, ShimError> {
        let component = component.into();
        let preferred = match resolved.selection {
            BackendSelection::ForceReference => None,
            BackendSelection::Auto | BackendSelection::ForcePreferred => match probe() {
                Ok(backend) => Some(backend),
                Err(err) if resolved.selection == BackendSelection::ForcePreferred => {
                    return Err(ShimError::BackendUnavailable {
                        component,
                        detail: err.to_string(),
                    });
                }
                Err(err) => {
                    events.emit(
                        event_codes::PREFERRED_UNAVAILABLE,
                        &component,
                        format!("probe failed: {}", err.message),
                        Some(err.kind.to_string()),
                    );
                    None
                }
            },
        };
        Ok(Self::new(
            component,
            preferred,
            reference_builder,
            resolved.fallback,
            events,
        ))
    }

    /// Route one contract operation to the backend currently in charge.
    ///
    /// `call` may run twice: once against the preferred backend and, after
    /// a degrade transition, once against the reference backend.
    pub fn dispatch<T>(
        &self,
        operation: &str,
        call: impl Fn(&C) -> Result<T, CapabilityError>,
    ) -> Result<T, CapabilityError> {
        if !self.degraded.load(Ordering::Acquire) {
            if let Some(preferred) = self.preferred.as_deref() {
                match call(preferred) {
                    Ok(value) => return Ok(value),
                    Err(err)
                        if err.is_fallback_trigger()
                            && self.fallback == FallbackPolicy::AutoDegrade =>
                    {
                        self.mark_degraded(operation, &err);
                        // fall through to the reference backend
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        call(self.reference())
    }

    /// Flip the sticky flag; the compare-and-set winner emits the single
    /// degrade diagnostic even when many threads observe failures at once.
    fn mark_degraded(&self, operation: &str, err: &CapabilityError) {
        if self
            .degraded
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::warn!(
                component = %self.component,
                operation,
                error = %err,
                "preferred backend degraded; routing to reference backend"
            );
            self.events.emit(
                event_codes::ADAPTER_DEGRADED,
                &self.component,
                format!("operation={operation} error={}", err.message),
                Some(err.kind.to_string()),
            );
        }
    }

    fn reference(&self) -> &C {
        self.reference.get_or_init(|| (self.reference_builder)())
    }

    #[must_use]
    pub fn has_preferred(&self) -> bool {
        self.preferred.is_some()
    }

    #[must_use]
    pub fn fallback_policy(&self) -> FallbackPolicy {
        self.fallback
    }
}

impl<C: ?Sized + Send + Sync + 'static> AdapterControl for CapabilityAdapter<C> {
    fn component_name(&self) -> &str {
        &self.component
    }

    fn active_backend(&self) -> BackendKind {
        if self.preferred.is_none() || self.degraded.load(Ordering::Acquire) {
            BackendKind::Reference
        } else {
            BackendKind::Preferred
        }
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.degraded.store(false, Ordering::Release);
    }
}

impl<C: ?Sized + Send + Sync + 'static> fmt::Debug for CapabilityAdapter<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityAdapter")
            .field("component", &self.component)
            .field("has_preferred", &self.preferred.is_some())
            .field("degraded", &self.is_degraded())
            .field("fallback", &self.fallback)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Minimal counter contract for exercising dispatch in isolation.
    trait Counter: Send + Sync {
        fn bump(&self) -> Result<u64, CapabilityError>;
    }

    struct Healthy(AtomicUsize);

    impl Counter for Healthy {
        fn bump(&self) -> Result<u64, CapabilityError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst) as u64 + 1)
        }
    }

    /// Fails every call with the given error; counts attempts.
    struct AlwaysFailing {
        kind: crate::error::CapabilityErrorKind,
        attempts: AtomicUsize,
    }

    impl Counter for AlwaysFailing {
        fn bump(&self) -> Result<u64, CapabilityError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(CapabilityError {
                kind: self.kind,
                message: "synthetic failure".to_string(),
            })
        }
    }

    fn reference_builder() -> ReferenceBuilder<dyn Counter> {
        Box::new(|| Box::new(Healthy(AtomicUsize::new(0))) as Box<dyn Counter>)
    }

    fn failing_preferred(kind: crate::error::CapabilityErrorKind) -> Box<dyn Counter> {
        Box::new(AlwaysFailing {
            kind,
            attempts: AtomicUsize::new(0),
        })
    }

    #[test]
    fn healthy_preferred_serves_every_call() {
        let events = EventLog::new();
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::new(
            "counter",
            Some(Box::new(Healthy(AtomicUsize::new(0)))),
            reference_builder(),
            FallbackPolicy::AutoDegrade,
            events.clone(),
        );

        assert_eq!(adapter.dispatch("bump", |c| c.bump()).unwrap(), 1);
        assert_eq!(adapter.dispatch("bump", |c| c.bump()).unwrap(), 2);
        assert_eq!(adapter.active_backend(), BackendKind::Preferred);
        assert!(!adapter.is_degraded());
        assert!(events.snapshot().is_empty());
    }

    #[test]
    fn backend_fault_degrades_once_and_retries_on_reference() {
        let events = EventLog::new();
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::new(
            "counter",
            Some(failing_preferred(crate::error::CapabilityErrorKind::Backend)),
            reference_builder(),
            FallbackPolicy::AutoDegrade,
            events.clone(),
        );

        // The failing call itself is answered by the reference backend.
        assert_eq!(adapter.dispatch("bump", |c| c.bump()).unwrap(), 1);
        assert!(adapter.is_degraded());
        assert_eq!(adapter.active_backend(), BackendKind::Reference);

        // Subsequent calls never touch the preferred backend again.
        assert_eq!(adapter.dispatch("bump", |c| c.bump()).unwrap(), 2);
        assert_eq!(events.count(event_codes::ADAPTER_DEGRADED), 1);
    }

    #[test]
    fn caller_input_error_propagates_without_degrade() {
        let events = EventLog::new();
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::new(
            "counter",
            Some(failing_preferred(
                crate::error::CapabilityErrorKind::CallerInput,
            )),
            reference_builder(),
            FallbackPolicy::AutoDegrade,
            events.clone(),
        );

        let err = adapter.dispatch("bump", |c| c.bump()).unwrap_err();
        assert_eq!(err.kind, crate::error::CapabilityErrorKind::CallerInput);
        assert!(!adapter.is_degraded());
        assert_eq!(adapter.active_backend(), BackendKind::Preferred);
        assert!(events.snapshot().is_empty());
    }

    #[test]
    fn propagate_policy_surfaces_backend_fault() {
        let events = EventLog::new();
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::new(
            "counter",
            Some(failing_preferred(crate::error::CapabilityErrorKind::Backend)),
            reference_builder(),
            FallbackPolicy::Propagate,
            events.clone(),
        );

        assert_eq!(adapter.fallback_policy(), FallbackPolicy::Propagate);
        let err = adapter.dispatch("bump", |c| c.bump()).unwrap_err();
        assert_eq!(err.kind, crate::error::CapabilityErrorKind::Backend);
        assert!(!adapter.is_degraded());
        assert!(events.snapshot().is_empty());
    }

    #[test]
    fn missing_preferred_routes_straight_to_reference() {
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::new(
            "counter",
            None,
            reference_builder(),
            FallbackPolicy::AutoDegrade,
            EventLog::new(),
        );

        assert_eq!(adapter.dispatch("bump", |c| c.bump()).unwrap(), 1);
        assert_eq!(adapter.active_backend(), BackendKind::Reference);
        // Reference-only mode is not a degrade transition.
        assert!(!adapter.is_degraded());
    }

    #[test]
    fn reset_rearms_the_preferred_backend() {
        let events = EventLog::new();
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::new(
            "counter",
            Some(failing_preferred(crate::error::CapabilityErrorKind::Backend)),
            reference_builder(),
            FallbackPolicy::AutoDegrade,
            events.clone(),
        );

        adapter.dispatch("bump", |c| c.bump()).unwrap();
        assert!(adapter.is_degraded());

        adapter.reset();
        assert!(!adapter.is_degraded());
        assert_eq!(adapter.active_backend(), BackendKind::Preferred);

        // The still-broken preferred backend degrades again, with a second
        // (distinct) transition event.
        adapter.dispatch("bump", |c| c.bump()).unwrap();
        assert!(adapter.is_degraded());
        assert_eq!(events.count(event_codes::ADAPTER_DEGRADED), 2);
    }

    #[test]
    fn probe_failure_under_auto_yields_reference_only() {
        let events = EventLog::new();
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::from_probe(
            "counter",
            || Err(CapabilityError::unavailable("no native support")),
            reference_builder(),
            &ResolvedConfig::default_enabled(),
            events.clone(),
        )
        .unwrap();

        assert!(!adapter.has_preferred());
        assert_eq!(adapter.active_backend(), BackendKind::Reference);
        assert!(!adapter.is_degraded());
        assert_eq!(events.count(event_codes::PREFERRED_UNAVAILABLE), 1);
    }

    #[test]
    fn probe_failure_under_force_preferred_is_an_error() {
        let resolved = ResolvedConfig {
            enabled: true,
            selection: BackendSelection::ForcePreferred,
            fallback: FallbackPolicy::Propagate,
        };
        let err = CapabilityAdapter::<dyn Counter>::from_probe(
            "counter",
            || Err(CapabilityError::unavailable("no native support")),
            reference_builder(),
            &resolved,
            EventLog::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ShimError::BackendUnavailable { .. }));
    }

    #[test]
    fn force_reference_never_runs_the_probe() {
        let resolved = ResolvedConfig {
            enabled: true,
            selection: BackendSelection::ForceReference,
            fallback: FallbackPolicy::AutoDegrade,
        };
        let adapter: CapabilityAdapter<dyn Counter> = CapabilityAdapter::from_probe(
            "counter",
            || panic!("probe must not run under force_reference"),
            reference_builder(),
            &resolved,
            EventLog::new(),
        )
        .unwrap();
        assert!(!adapter.has_preferred());
    }

    #[test]
    fn concurrent_failures_produce_exactly_one_transition() {
        let events = EventLog::new();
        let adapter: Arc<CapabilityAdapter<dyn Counter>> = Arc::new(CapabilityAdapter::new(
            "counter",
            Some(failing_preferred(crate::error::CapabilityErrorKind::Backend)),
            reference_builder(),
            FallbackPolicy::AutoDegrade,
            events.clone(),
        ));

        std::thread::scope(|scope| {
            for _ in 0..16 {
                let adapter = Arc::clone(&adapter);
                scope.spawn(move || {
                    for _ in 0..8 {
                        adapter.dispatch("bump", |c| c.bump()).unwrap();
                    }
                });
            }
        });

        assert!(adapter.is_degraded());
        assert_eq!(events.count(event_codes::ADAPTER_DEGRADED), 1);
    }
}
