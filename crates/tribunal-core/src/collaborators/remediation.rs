//! Remediation text from rubric templates.

use std::collections::BTreeMap;

use crate::collaborators::RemediationTextProvider;
use crate::domain::rubric::Rubric;
use crate::domain::verdict::SynthesisRule;

const FACT_SUPREMACY_NOTE: &str =
    "Back every claim with artifacts the investigators can confirm; unsupported citations were discounted.";
const SECURITY_NOTE: &str =
    "Resolve the confirmed security finding first; the score is capped until it is gone.";

/// Joins a criterion's remediation templates and appends notes for the
/// rules that shaped its score.
#[derive(Debug, Clone, Default)]
pub struct TemplateRemediation {
    templates: BTreeMap<String, Vec<String>>,
}

impl TemplateRemediation {
    pub fn from_rubric(rubric: &Rubric) -> Self {
        Self {
            templates: rubric
                .criteria
                .iter()
                .map(|c| (c.id.clone(), c.remediation_templates.clone()))
                .collect(),
        }
    }
}

impl RemediationTextProvider for TemplateRemediation {
    fn remediation_text(&self, criterion_id: &str, final_score: u8, rule_trace: &[SynthesisRule]) -> String {
        let mut parts: Vec<String> = match self.templates.get(criterion_id) {
            Some(templates) if !templates.is_empty() => templates.clone(),
            _ => vec![format!("Revisit {criterion_id}; it scored {final_score} of 5.")],
        };
        if rule_trace.contains(&SynthesisRule::SecurityOverride) {
            parts.insert(0, SECURITY_NOTE.to_string());
        }
        if rule_trace.contains(&SynthesisRule::FactSupremacy) {
            parts.push(FACT_SUPREMACY_NOTE.to_string());
        }
        parts.join(" ")
    }
}
