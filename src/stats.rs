//! Pipeline statistics.
//!
//! The orchestrator reports every check, detector invocation, and detector
//! error to a [`StatsCollector`].  [`InMemoryStats`] is the default
//! implementation — lock-free atomic counters, suitable for scraping by
//! whatever exporter the host application runs.  Only masked data reaches
//! this surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::detectors::Layer;
use crate::pipeline::outcome::{Decision, GuardResult};

// ── Snapshot types ─────────────────────────────────────────────────────

/// Per-detector counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorStats {
    /// Latency/cost tier of the detector.
    pub layer: Layer,
    /// Total invocations.
    pub invocations: u64,
    /// Invocations that produced a triggered verdict.
    pub triggered: u64,
    /// Invocations that errored.
    pub errors: u64,
    /// Cumulative check latency in milliseconds.
    pub total_latency_ms: f64,
}

/// Aggregate pipeline statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardStats {
    /// Input pipeline runs.
    pub input_checks: u64,
    /// Output pipeline runs.
    pub output_checks: u64,
    /// Results per decision.
    pub passed: u64,
    /// Results that flagged.
    pub flagged: u64,
    /// Results that escalated.
    pub escalated: u64,
    /// Results that blocked.
    pub blocked: u64,
    /// Per-detector breakdown.
    pub detectors: HashMap<String, DetectorStats>,
}

// ── StatsCollector ─────────────────────────────────────────────────────

/// Sink for pipeline metrics.  Implementations must be cheap — they run on
/// the hot path.
pub trait StatsCollector: Send + Sync {
    /// Record a completed pipeline run.
    fn record_check(&self, result: &GuardResult, is_input: bool);

    /// Record one detector invocation.
    fn record_detector(&self, name: &str, layer: Layer, latency_ms: f64, triggered: bool);

    /// Record a detector error.
    fn record_error(&self, name: &str, layer: Layer);

    /// Produce a point-in-time snapshot.
    fn snapshot(&self) -> GuardStats;
}

// ── InMemoryStats ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DetectorCounters {
    layer: std::sync::OnceLock<Layer>,
    invocations: AtomicU64,
    triggered: AtomicU64,
    errors: AtomicU64,
    /// Cumulative latency in microseconds, so it fits an atomic.
    total_latency_us: AtomicU64,
}

/// Default in-process stats collector.
#[derive(Debug, Default)]
pub struct InMemoryStats {
    input_checks: AtomicU64,
    output_checks: AtomicU64,
    passed: AtomicU64,
    flagged: AtomicU64,
    escalated: AtomicU64,
    blocked: AtomicU64,
    detectors: DashMap<String, DetectorCounters>,
}

impl InMemoryStats {
    /// Create a collector with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsCollector for InMemoryStats {
    fn record_check(&self, result: &GuardResult, is_input: bool) {
        if is_input {
            self.input_checks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.output_checks.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match result.decision {
            Decision::Pass => &self.passed,
            Decision::Flag => &self.flagged,
            Decision::Escalate => &self.escalated,
            Decision::Block => &self.blocked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn record_detector(&self, name: &str, layer: Layer, latency_ms: f64, triggered: bool) {
        let entry = self.detectors.entry(name.to_string()).or_default();
        let _ = entry.layer.set(layer);
        entry.invocations.fetch_add(1, Ordering::Relaxed);
        if triggered {
            entry.triggered.fetch_add(1, Ordering::Relaxed);
        }
        entry
            .total_latency_us
            .fetch_add((latency_ms * 1000.0).max(0.0) as u64, Ordering::Relaxed);
    }

    fn record_error(&self, name: &str, layer: Layer) {
        let entry = self.detectors.entry(name.to_string()).or_default();
        let _ = entry.layer.set(layer);
        entry.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GuardStats {
        let detectors = self
            .detectors
            .iter()
            .map(|entry| {
                let c = entry.value();
                #[allow(clippy::cast_precision_loss)]
                let total_latency_ms = c.total_latency_us.load(Ordering::Relaxed) as f64 / 1000.0;
                (
                    entry.key().clone(),
                    DetectorStats {
                        layer: c.layer.get().copied().unwrap_or(Layer::L1),
                        invocations: c.invocations.load(Ordering::Relaxed),
                        triggered: c.triggered.load(Ordering::Relaxed),
                        errors: c.errors.load(Ordering::Relaxed),
                        total_latency_ms,
                    },
                )
            })
            .collect();

        GuardStats {
            input_checks: self.input_checks.load(Ordering::Relaxed),
            output_checks: self.output_checks.load(Ordering::Relaxed),
            passed: self.passed.load(Ordering::Relaxed),
            flagged: self.flagged.load(Ordering::Relaxed),
            escalated: self.escalated.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            detectors,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::outcome::Severity;

    fn result(decision: Decision) -> GuardResult {
        GuardResult {
            decision,
            max_severity: Severity::None,
            ..GuardResult::pass("req")
        }
    }

    #[test]
    fn decisions_counted_per_kind() {
        let stats = InMemoryStats::new();
        stats.record_check(&result(Decision::Pass), true);
        stats.record_check(&result(Decision::Block), true);
        stats.record_check(&result(Decision::Flag), false);

        let snap = stats.snapshot();
        assert_eq!(snap.input_checks, 2);
        assert_eq!(snap.output_checks, 1);
        assert_eq!(snap.passed, 1);
        assert_eq!(snap.blocked, 1);
        assert_eq!(snap.flagged, 1);
    }

    #[test]
    fn detector_counters_accumulate() {
        let stats = InMemoryStats::new();
        stats.record_detector("L1PromptInjection", Layer::L1, 0.4, false);
        stats.record_detector("L1PromptInjection", Layer::L1, 0.6, true);
        stats.record_error("L1PromptInjection", Layer::L1);

        let snap = stats.snapshot();
        let d = &snap.detectors["L1PromptInjection"];
        assert_eq!(d.invocations, 2);
        assert_eq!(d.triggered, 1);
        assert_eq!(d.errors, 1);
        assert!((d.total_latency_ms - 1.0).abs() < 0.01);
        assert_eq!(d.layer, Layer::L1);
    }

    #[test]
    fn snapshot_of_empty_collector() {
        let snap = InMemoryStats::new().snapshot();
        assert_eq!(snap.input_checks, 0);
        assert!(snap.detectors.is_empty());
    }
}
