//! Rubric definitions: the criteria every audit run scores.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::EvidenceMap;

/// Tags that make a criterion architectural for the functionality weighting.
pub const ARCHITECTURE_TAGS: [&str; 2] = ["architecture", "orchestration"];

/// A single rubric criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Evidence ids relevant to this criterion. Empty means "all evidence".
    #[serde(default)]
    pub evidence_ids: Vec<String>,
    #[serde(default)]
    pub remediation_templates: Vec<String>,
}

impl Criterion {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tags: BTreeSet::new(),
            evidence_ids: Vec::new(),
            remediation_templates: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_evidence(mut self, evidence_id: impl Into<String>) -> Self {
        self.evidence_ids.push(evidence_id.into());
        self
    }

    pub fn with_remediation(mut self, text: impl Into<String>) -> Self {
        self.remediation_templates.push(text.into());
        self
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Whether the pragmatic persona's score is weighted double.
    pub fn is_architectural(&self) -> bool {
        ARCHITECTURE_TAGS.iter().any(|t| self.tags.contains(*t))
    }

    /// The subset of `evidences` this criterion is judged on.
    pub fn relevant_evidence(&self, evidences: &EvidenceMap) -> EvidenceMap {
        if self.evidence_ids.is_empty() {
            return evidences.clone();
        }
        self.evidence_ids
            .iter()
            .filter_map(|id| evidences.get(id).map(|e| (id.clone(), e.clone())))
            .collect()
    }
}

/// An ordered list of criteria. Declaration order is significant: it is the
/// report order and the tie-breaker of the remediation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    #[serde(alias = "dimensions")]
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn new(criteria: Vec<Criterion>) -> Result<Self> {
        let rubric = Self { criteria };
        rubric.validate()?;
        Ok(rubric)
    }

    /// Parse and validate a rubric JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let rubric: Rubric = serde_json::from_str(raw)
            .map_err(|e| AuditError::InvalidRubric(format!("malformed rubric JSON: {e}")))?;
        rubric.validate()?;
        Ok(rubric)
    }

    /// Load a rubric from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject empty rubrics and missing or duplicate criterion ids.
    pub fn validate(&self) -> Result<()> {
        if self.criteria.is_empty() {
            return Err(AuditError::InvalidRubric(
                "rubric must declare at least one criterion".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for criterion in &self.criteria {
            if criterion.id.trim().is_empty() {
                return Err(AuditError::InvalidRubric(
                    "criterion id must not be empty".to_string(),
                ));
            }
            if !seen.insert(criterion.id.as_str()) {
                return Err(AuditError::InvalidRubric(format!(
                    "duplicate criterion id: {}",
                    criterion.id
                )));
            }
        }
        Ok(())
    }

    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.id == id)
    }

    /// Declaration index of a criterion.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.criteria.iter().position(|c| c.id == id)
    }

    /// Union of every evidence id the criteria declare.
    pub fn expected_evidence_ids(&self) -> BTreeSet<String> {
        self.criteria
            .iter()
            .flat_map(|c| c.evidence_ids.iter().cloned())
            .collect()
    }

    /// Built-in rubric used when none is supplied.
    pub fn default_rubric() -> Self {
        Self {
            criteria: vec![
                Criterion::new("C1_Orchestration", "Graph Orchestration Architecture")
                    .with_tag("orchestration")
                    .with_evidence("repo.graph_wiring")
                    .with_evidence("repo.state_structure")
                    .with_remediation("Implement explicit fan-out/fan-in edges in the graph wiring.")
                    .with_remediation("Ensure evidence producers and judges execute in parallel branches."),
                Criterion::new("C2_Engineering", "State Management Rigor")
                    .with_tag("engineering")
                    .with_evidence("repo.state_structure")
                    .with_evidence("doc.concept_verification")
                    .with_remediation("Strengthen typed state and reducer contracts.")
                    .with_remediation("Add deterministic synthesis constraints for final scoring."),
                Criterion::new("C3_Effort", "Development Narrative")
                    .with_tag("effort")
                    .with_evidence("repo.git_narrative")
                    .with_evidence("doc.citation_check")
                    .with_remediation("Use atomic commits with meaningful messages.")
                    .with_remediation("Document iteration decisions in the README or report."),
                Criterion::new("C4_Security", "Safe Tool Engineering")
                    .with_tag("security")
                    .with_evidence("repo.security_scan")
                    .with_remediation("Replace shell invocations with argument-vector process calls.")
                    .with_remediation("Sandbox repository cloning in temporary directories."),
            ],
        }
    }
}
