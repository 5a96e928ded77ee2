//! Final report assembly.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::collaborators::RemediationTextProvider;
use crate::domain::error::Result;
use crate::domain::rubric::Rubric;
use crate::domain::verdict::{AuditReport, CriterionVerdict, RemediationItem};
use crate::state::RunState;

/// Explanation carried by every verdict of a run that never reached synthesis.
pub const INSUFFICIENT_INPUT: &str = "insufficient input: evidence could not be collected for this audit";

/// Remediation text for criteria at or above the satisfactory score.
pub const SATISFACTORY_PLACEHOLDER: &str = "Meets expectations; no remediation required.";

/// Turns the verdict set into an [`AuditReport`].
pub struct ReportAssembler {
    satisfactory_score: u8,
    remediation: Arc<dyn RemediationTextProvider>,
}

impl ReportAssembler {
    pub fn new(satisfactory_score: u8, remediation: Arc<dyn RemediationTextProvider>) -> Self {
        Self {
            satisfactory_score,
            remediation,
        }
    }

    /// Assemble the report.
    ///
    /// Verdicts are placed in rubric order; a criterion without a verdict
    /// gets a degraded one. Verdicts for unknown criteria are dropped.
    /// Fails only if a verdict cannot be digested.
    pub fn assemble(
        &self,
        rubric: &Rubric,
        verdicts: &[CriterionVerdict],
        state: &RunState,
        run_id: Uuid,
        generated_at: DateTime<Utc>,
    ) -> Result<AuditReport> {
        let criteria: Vec<CriterionVerdict> = rubric
            .criteria
            .iter()
            .map(|c| {
                verdicts
                    .iter()
                    .find(|v| v.criterion_id == c.id)
                    .cloned()
                    .unwrap_or_else(|| CriterionVerdict::degraded(&c.id, "no verdict was produced"))
            })
            .collect();

        let overall_score = if criteria.is_empty() {
            0.0
        } else {
            criteria.iter().map(|v| f64::from(v.final_score)).sum::<f64>() / criteria.len() as f64
        };

        let mut ordered: Vec<&CriterionVerdict> = criteria.iter().collect();
        ordered.sort_by_key(|v| (v.final_score, rubric.position(&v.criterion_id)));
        let remediation_plan = ordered
            .into_iter()
            .map(|v| RemediationItem {
                criterion_id: v.criterion_id.clone(),
                final_score: v.final_score,
                text: if v.final_score >= self.satisfactory_score {
                    SATISFACTORY_PLACEHOLDER.to_string()
                } else {
                    self.remediation
                        .remediation_text(&v.criterion_id, v.final_score, &v.rule_trace)
                },
            })
            .collect();

        let dissent_log = criteria
            .iter()
            .filter_map(|v| {
                v.dissent_summary
                    .as_ref()
                    .map(|d| (v.criterion_id.clone(), d.clone()))
            })
            .collect();

        let verdict_digests = criteria
            .iter()
            .map(|v| Ok((v.criterion_id.clone(), v.digest()?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let degraded = state.is_fatal() || criteria.iter().any(|v| v.degraded);

        Ok(AuditReport {
            run_id,
            generated_at,
            criteria,
            overall_score,
            remediation_plan,
            evidence_index: state.evidences.clone(),
            dissent_log,
            degraded,
            logs: state.logs.clone(),
            verdict_digests,
        })
    }
}
