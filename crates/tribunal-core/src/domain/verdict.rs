//! Verdicts, synthesis rules and the final audit report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::digest::compute_digest;
use crate::domain::error::Result;
use crate::domain::evidence::EvidenceMap;
use crate::domain::opinion::Persona;

/// Named synthesis rules, in the order the pipeline applies them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisRule {
    FunctionalityWeight,
    FactSupremacy,
    SecurityOverride,
    VarianceReEvaluation,
    DissentRequirement,
}

impl SynthesisRule {
    /// Fixed application order.
    pub const PIPELINE: [SynthesisRule; 5] = [
        SynthesisRule::FunctionalityWeight,
        SynthesisRule::FactSupremacy,
        SynthesisRule::SecurityOverride,
        SynthesisRule::VarianceReEvaluation,
        SynthesisRule::DissentRequirement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SynthesisRule::FunctionalityWeight => "functionality_weight",
            SynthesisRule::FactSupremacy => "fact_supremacy",
            SynthesisRule::SecurityOverride => "security_override",
            SynthesisRule::VarianceReEvaluation => "variance_re_evaluation",
            SynthesisRule::DissentRequirement => "dissent_requirement",
        }
    }
}

impl std::fmt::Display for SynthesisRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic outcome of synthesizing one criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub criterion_id: String,
    /// Integer score in 1..=5.
    pub final_score: u8,
    /// Rules that changed or constrained the score, in pipeline order.
    pub rule_trace: Vec<SynthesisRule>,
    /// Present iff `dissent_requirement` fired.
    pub dissent_summary: Option<String>,
    pub persona_scores: BTreeMap<Persona, u8>,
    pub explanation: String,
    /// Set when the verdict was not synthesized from three opinions.
    #[serde(default)]
    pub degraded: bool,
}

impl CriterionVerdict {
    /// Placeholder verdict for a criterion that could not be synthesized.
    pub fn degraded(criterion_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            criterion_id: criterion_id.into(),
            final_score: 1,
            rule_trace: Vec::new(),
            dissent_summary: None,
            persona_scores: BTreeMap::new(),
            explanation: reason.into(),
            degraded: true,
        }
    }

    /// Hex SHA-256 of the verdict's canonical serialization.
    pub fn digest(&self) -> Result<String> {
        compute_digest(self)
    }
}

/// One entry of the remediation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationItem {
    pub criterion_id: String,
    pub final_score: u8,
    pub text: String,
}

/// The final, read-only product of an audit run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// One verdict per rubric criterion, in rubric order.
    pub criteria: Vec<CriterionVerdict>,
    /// Arithmetic mean of the final scores.
    pub overall_score: f64,
    /// Ascending by final score; ties keep rubric order.
    pub remediation_plan: Vec<RemediationItem>,
    pub evidence_index: EvidenceMap,
    /// `(criterion_id, dissent_summary)` for every criterion with dissent.
    pub dissent_log: Vec<(String, String)>,
    /// Whether the run ended without synthesizing from full evidence.
    pub degraded: bool,
    pub logs: Vec<String>,
    /// Hex SHA-256 of each verdict, keyed by criterion id.
    #[serde(default)]
    pub verdict_digests: BTreeMap<String, String>,
}

impl AuditReport {
    pub fn verdict(&self, criterion_id: &str) -> Option<&CriterionVerdict> {
        self.criteria.iter().find(|v| v.criterion_id == criterion_id)
    }

    /// Digest over the verdicts only, stable across runs on the same inputs.
    pub fn verdict_digest(&self) -> Result<String> {
        compute_digest(&self.criteria)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: u8) -> CriterionVerdict {
        let mut persona_scores = BTreeMap::new();
        persona_scores.insert(Persona::Prosecutor, 3);
        persona_scores.insert(Persona::Defense, 4);
        persona_scores.insert(Persona::TechLead, 4);
        CriterionVerdict {
            criterion_id: "C1".to_string(),
            final_score: score,
            rule_trace: vec![SynthesisRule::SecurityOverride],
            dissent_summary: None,
            persona_scores,
            explanation: "mean".to_string(),
            degraded: false,
        }
    }

    #[test]
    fn test_rule_serializes_snake_case() {
        let json = serde_json::to_string(&SynthesisRule::VarianceReEvaluation).unwrap();
        assert_eq!(json, "\"variance_re_evaluation\"");
        assert_eq!(SynthesisRule::PIPELINE[0].as_str(), "functionality_weight");
    }

    #[test]
    fn test_verdict_digest_is_stable() {
        assert_eq!(verdict(4).digest().unwrap(), verdict(4).digest().unwrap());
        assert_ne!(verdict(4).digest().unwrap(), verdict(3).digest().unwrap());
    }

    #[test]
    fn test_degraded_verdict_shape() {
        let v = CriterionVerdict::degraded("C2", "insufficient input");
        assert!(v.degraded);
        assert_eq!(v.final_score, 1);
        assert!(v.rule_trace.is_empty());
        assert!(v.dissent_summary.is_none());
    }
}
