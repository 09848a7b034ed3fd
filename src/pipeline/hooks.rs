//! Application hook surface.
//!
//! Every hook is a plain function value; an absent hook is a no-op.  Hooks
//! never mutate in place — the custom-decision hook returns a tagged
//! [`HookDecision`] and the error hook an [`ErrorAction`], so overrides are
//! explicit and auditable.

use std::sync::Arc;

use crate::detectors::DetectorError;

use super::context::CheckContext;
use super::outcome::GuardResult;

/// What the custom-decision hook wants done with the pipeline's result.
#[derive(Debug, Clone)]
pub enum HookDecision {
    /// Keep the pipeline's result.
    Continue,
    /// Replace the result wholesale.
    Override(GuardResult),
}

/// What the error hook wants done with a detector failure.
#[derive(Debug, Clone)]
pub enum ErrorAction {
    /// Honor the configured fail-mode.
    Continue,
    /// Short-circuit the pipeline with this result.
    Override(GuardResult),
}

type BeforeCheckFn = dyn Fn(&CheckContext) -> bool + Send + Sync;
type ResultFn = dyn Fn(&CheckContext, &GuardResult) + Send + Sync;
type CustomDecisionFn = dyn Fn(&CheckContext, &GuardResult) -> HookDecision + Send + Sync;
type GuardErrorFn = dyn Fn(&CheckContext, &str, &DetectorError) -> ErrorAction + Send + Sync;
type BeforeEscalationFn = dyn Fn(&CheckContext, &GuardResult) -> bool + Send + Sync;
type EscalationTimeoutFn = dyn Fn(&CheckContext, &GuardResult) -> GuardResult + Send + Sync;

/// The full hook set.  Build with the `on_*` setters; unset hooks are no-ops.
#[derive(Clone, Default)]
pub struct GuardHooks {
    pub(crate) before_check: Option<Arc<BeforeCheckFn>>,
    pub(crate) after_check: Option<Arc<ResultFn>>,
    pub(crate) blocked: Option<Arc<ResultFn>>,
    pub(crate) flagged: Option<Arc<ResultFn>>,
    pub(crate) passed: Option<Arc<ResultFn>>,
    pub(crate) custom_decision: Option<Arc<CustomDecisionFn>>,
    pub(crate) guard_error: Option<Arc<GuardErrorFn>>,
    pub(crate) before_escalation: Option<Arc<BeforeEscalationFn>>,
    pub(crate) escalation_timeout: Option<Arc<EscalationTimeoutFn>>,
}

impl std::fmt::Debug for GuardHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardHooks")
            .field("before_check", &self.before_check.is_some())
            .field("after_check", &self.after_check.is_some())
            .field("blocked", &self.blocked.is_some())
            .field("flagged", &self.flagged.is_some())
            .field("passed", &self.passed.is_some())
            .field("custom_decision", &self.custom_decision.is_some())
            .field("guard_error", &self.guard_error.is_some())
            .field("before_escalation", &self.before_escalation.is_some())
            .field("escalation_timeout", &self.escalation_timeout.is_some())
            .finish()
    }
}

impl GuardHooks {
    /// An empty hook set (every hook a no-op).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called before anything runs; returning `false` short-circuits the
    /// pipeline with a Pass.
    #[must_use]
    pub fn on_before_check(
        mut self,
        hook: impl Fn(&CheckContext) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.before_check = Some(Arc::new(hook));
        self
    }

    /// Called after the result is final, regardless of decision.
    #[must_use]
    pub fn on_after_check(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) + Send + Sync + 'static,
    ) -> Self {
        self.after_check = Some(Arc::new(hook));
        self
    }

    /// Called when the decision is Block.
    #[must_use]
    pub fn on_blocked(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) + Send + Sync + 'static,
    ) -> Self {
        self.blocked = Some(Arc::new(hook));
        self
    }

    /// Called when the decision is Flag.
    #[must_use]
    pub fn on_flagged(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) + Send + Sync + 'static,
    ) -> Self {
        self.flagged = Some(Arc::new(hook));
        self
    }

    /// Called when the decision is Pass.
    #[must_use]
    pub fn on_passed(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) + Send + Sync + 'static,
    ) -> Self {
        self.passed = Some(Arc::new(hook));
        self
    }

    /// Called with the aggregated result before it is published; may
    /// override it.
    #[must_use]
    pub fn on_custom_decision(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) -> HookDecision + Send + Sync + 'static,
    ) -> Self {
        self.custom_decision = Some(Arc::new(hook));
        self
    }

    /// Called when a detector errors; may override the fail-mode outcome.
    #[must_use]
    pub fn on_guard_error(
        mut self,
        hook: impl Fn(&CheckContext, &str, &DetectorError) -> ErrorAction + Send + Sync + 'static,
    ) -> Self {
        self.guard_error = Some(Arc::new(hook));
        self
    }

    /// Called before the remote judge is consulted; returning `false` skips
    /// escalation and keeps the local result.
    #[must_use]
    pub fn on_before_escalation(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.before_escalation = Some(Arc::new(hook));
        self
    }

    /// Called when the remote judge times out; the returned result replaces
    /// the local one.
    #[must_use]
    pub fn on_escalation_timeout(
        mut self,
        hook: impl Fn(&CheckContext, &GuardResult) -> GuardResult + Send + Sync + 'static,
    ) -> Self {
        self.escalation_timeout = Some(Arc::new(hook));
        self
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
