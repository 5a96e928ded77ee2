//! Evidence aggregation barrier.
//!
//! Runs once all evidence producers have completed and decides whether
//! opinion dispatch may proceed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::AuditConfig;
use crate::domain::evidence::{namespace, AuditTarget, Evidence, SECURITY_TAG};
use crate::domain::rubric::Rubric;
use crate::state::{PartialUpdate, RunState};

/// Routing key written by the barrier.
pub const ROUTING_KEY: &str = "evidence";

const DOC_NAMESPACE: &str = "doc";

/// Decision of the evidence barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceRoute {
    Ready,
    MissingEvidence,
    CloneFailure,
}

impl EvidenceRoute {
    pub fn label(self) -> &'static str {
        match self {
            EvidenceRoute::Ready => "ready",
            EvidenceRoute::MissingEvidence => "missing_evidence",
            EvidenceRoute::CloneFailure => "clone_failure",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "ready" => Some(EvidenceRoute::Ready),
            "missing_evidence" => Some(EvidenceRoute::MissingEvidence),
            "clone_failure" => Some(EvidenceRoute::CloneFailure),
            _ => None,
        }
    }
}

/// What the barrier measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletenessReport {
    pub expected: BTreeSet<String>,
    /// Expected ids whose evidence can back an opinion.
    pub usable: BTreeSet<String>,
    pub usable_ratio: f64,
    /// Required ids that are absent or unusable.
    pub missing_required: Vec<String>,
}

/// Whether `evidence` counts towards completeness.
///
/// Ordinary evidence must be `found`. For security evidence `found` reports
/// a risk, so its presence alone is enough.
fn is_usable(evidence: &Evidence) -> bool {
    evidence.found || evidence.has_tag(SECURITY_TAG)
}

/// Evidence ids the barrier waits for in a run over `target`.
///
/// `doc.*` ids are dropped when the target carries no report, since no
/// producer can emit them.
pub fn expected_ids(rubric: &Rubric, target: &AuditTarget) -> BTreeSet<String> {
    let mut expected = rubric.expected_evidence_ids();
    if target.report.is_none() {
        expected.retain(|id| namespace(id) != DOC_NAMESPACE);
    }
    expected
}

/// Measure completeness and pick a route.
///
/// `expected` is usually [`expected_ids`]. It is unioned with
/// `config.required_evidence`; when both are empty every evidence item in
/// the state counts as expected.
pub fn assess(
    state: &RunState,
    expected: &BTreeSet<String>,
    config: &AuditConfig,
) -> (EvidenceRoute, CompletenessReport) {
    let mut expected: BTreeSet<String> = expected.clone();
    expected.extend(config.required_evidence.iter().cloned());
    if expected.is_empty() {
        expected = state.evidences.keys().cloned().collect();
    }

    let usable: BTreeSet<String> = expected
        .iter()
        .filter(|id| state.evidences.get(*id).is_some_and(is_usable))
        .cloned()
        .collect();
    let ratio = if expected.is_empty() {
        0.0
    } else {
        usable.len() as f64 / expected.len() as f64
    };
    let missing_required: Vec<String> = config
        .required_evidence
        .iter()
        .filter(|id| !usable.contains(*id))
        .cloned()
        .collect();

    let route = if state.is_fatal() {
        EvidenceRoute::CloneFailure
    } else if !missing_required.is_empty() || ratio < config.completeness_threshold {
        EvidenceRoute::MissingEvidence
    } else {
        EvidenceRoute::Ready
    };

    (
        route,
        CompletenessReport {
            expected,
            usable,
            usable_ratio: ratio,
            missing_required,
        },
    )
}

/// Barrier body: assess and record the decision in the state.
pub fn aggregate(state: &RunState, expected: &BTreeSet<String>, config: &AuditConfig) -> PartialUpdate {
    let (route, report) = assess(state, expected, config);
    let mut line = format!(
        "evidence_aggregator: {} (usable_ratio={:.2}, {}/{} expected ids usable)",
        route.label(),
        report.usable_ratio,
        report.usable.len(),
        report.expected.len()
    );
    if !report.missing_required.is_empty() {
        line.push_str(&format!(", missing required: {}", report.missing_required.join(", ")));
    }
    if let Some(reason) = &state.fatal {
        line.push_str(&format!(", fatal: {reason}"));
    }
    PartialUpdate::new()
        .route(ROUTING_KEY, route.label())
        .log(line)
}

/// Router of the barrier node.
pub fn route(state: &RunState) -> String {
    if state.is_fatal() {
        return EvidenceRoute::CloneFailure.label().to_string();
    }
    state
        .routing
        .get(ROUTING_KEY)
        .and_then(|l| EvidenceRoute::from_label(l))
        .unwrap_or(EvidenceRoute::MissingEvidence)
        .label()
        .to_string()
}
