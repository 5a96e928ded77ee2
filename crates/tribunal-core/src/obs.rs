//! Structured observability hooks for audit run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span, [`AuditSpan`]
//! - Emission functions for the key lifecycle events of a run
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered in JSON output.

use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, Instrument};

/// Run-scoped tracing span. Every event emitted while the instrumented
/// future runs carries `run_id`.
pub struct AuditSpan {
    span: tracing::Span,
}

impl AuditSpan {
    pub fn new(run_id: &str) -> Self {
        Self {
            span: tracing::info_span!("tribunal.audit", run_id = %run_id),
        }
    }

    /// Run `fut` inside the span.
    pub fn instrument<F: Future>(self, fut: F) -> Instrumented<F> {
        fut.instrument(self.span)
    }
}

pub fn emit_audit_started(run_id: &str, target: &str, criteria: usize) {
    info!(event = "audit.started", run_id = %run_id, target = %target, criteria = criteria);
}

pub fn emit_audit_finished(run_id: &str, duration_ms: u64, overall_score: f64, degraded: bool) {
    info!(
        event = "audit.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        overall_score = overall_score,
        degraded = degraded,
    );
}

pub fn emit_node_completed(node: &str, duration_ms: u64) {
    info!(event = "node.completed", node = %node, duration_ms = duration_ms);
}

/// Node failures are captured, so this is a warning rather than an error.
pub fn emit_node_failed(node: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "node.failed", node = %node, error = %error);
}

pub fn emit_route_selected(node: &str, label: &str, short_circuit: bool) {
    info!(
        event = "route.selected",
        node = %node,
        label = %label,
        short_circuit = short_circuit,
    );
}

pub fn emit_opinion_fallback(criterion_id: &str, persona: &str, attempts: u32) {
    tracing::warn!(
        event = "opinion.fallback",
        criterion_id = %criterion_id,
        persona = %persona,
        attempts = attempts,
    );
}

pub fn emit_verdict_synthesized(criterion_id: &str, final_score: u8, rules: usize) {
    info!(
        event = "verdict.synthesized",
        criterion_id = %criterion_id,
        final_score = final_score,
        rules = rules,
    );
}

/// Mirror a state log line to tracing.
pub fn emit_state_log(line: &str) {
    tracing::debug!(event = "state.log", "{line}");
}
