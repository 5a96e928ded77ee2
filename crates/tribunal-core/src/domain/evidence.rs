//! Evidence records produced by evidence producers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::error::{AuditError, Result};

/// Tag carried by evidence that reports a security finding.
pub const SECURITY_TAG: &str = "security";

/// Evidence keyed by its namespaced id. Ordered so iteration is reproducible.
pub type EvidenceMap = BTreeMap<String, Evidence>;

/// A single fact about the audited artifacts.
///
/// Immutable once validated; the run state owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Namespaced id, e.g. `"repo.security_scan"`.
    pub id: String,
    /// The forensic objective this evidence answers.
    pub goal: String,
    pub found: bool,
    /// File path, commit hash or other source location.
    pub location: String,
    pub rationale: String,
    /// Certainty of the fact, 0.0–1.0.
    pub confidence: f64,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Optional excerpt backing the fact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Evidence {
    /// Create and validate an evidence record.
    pub fn new(
        id: impl Into<String>,
        goal: impl Into<String>,
        found: bool,
        location: impl Into<String>,
        rationale: impl Into<String>,
        confidence: f64,
    ) -> Result<Self> {
        let evidence = Self {
            id: id.into(),
            goal: goal.into(),
            found,
            location: location.into(),
            rationale: rationale.into(),
            confidence,
            tags: BTreeSet::new(),
            content: None,
        };
        evidence.validate()?;
        Ok(evidence)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Check the record invariants: namespaced id and `0 ≤ confidence ≤ 1`.
    pub fn validate(&self) -> Result<()> {
        let namespaced = self
            .id
            .split_once('.')
            .is_some_and(|(ns, rest)| !ns.is_empty() && !rest.is_empty());
        if !namespaced {
            return Err(AuditError::InvalidEvidence {
                id: self.id.clone(),
                reason: "id must be namespaced as <producer>.<name>".to_string(),
            });
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(AuditError::InvalidEvidence {
                id: self.id.clone(),
                reason: format!("confidence {} outside [0, 1]", self.confidence),
            });
        }
        Ok(())
    }
}

/// Outcome flag reported by an evidence producer alongside its evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Ok,
    FatalResolutionError,
}

/// Everything a single evidence producer returned for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBatch {
    pub evidences: Vec<Evidence>,
    pub status: ResolutionStatus,
    /// Human-readable note, e.g. the resolution failure reason.
    pub detail: Option<String>,
}

impl EvidenceBatch {
    pub fn ok(evidences: Vec<Evidence>) -> Self {
        Self {
            evidences,
            status: ResolutionStatus::Ok,
            detail: None,
        }
    }

    pub fn fatal(detail: impl Into<String>) -> Self {
        Self {
            evidences: Vec::new(),
            status: ResolutionStatus::FatalResolutionError,
            detail: Some(detail.into()),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.status == ResolutionStatus::FatalResolutionError
    }
}

/// The artifact set under audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTarget {
    /// Local repository path or git URL.
    pub repo: String,
    /// Optional architecture report.
    pub report: Option<PathBuf>,
}

impl AuditTarget {
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            report: None,
        }
    }

    pub fn with_report(mut self, report: impl Into<PathBuf>) -> Self {
        self.report = Some(report.into());
        self
    }

    /// Whether `repo` names a remote that has to be cloned.
    pub fn is_remote(&self) -> bool {
        let repo = self.repo.trim();
        repo.starts_with("https://") || repo.starts_with("http://") || repo.starts_with("git@")
    }
}

/// The producer namespace of an evidence id, i.e. everything before the
/// first `.`.
pub fn namespace(id: &str) -> &str {
    id.split('.').next().unwrap_or_default()
}

/// Fraction of `ids` present in `evidences` with `found = true`.
///
/// Returns `0.0` for an empty id set.
pub fn found_ratio<'a>(ids: impl IntoIterator<Item = &'a String>, evidences: &EvidenceMap) -> f64 {
    let mut total = 0usize;
    let mut found = 0usize;
    for id in ids {
        total += 1;
        if evidences.get(id).is_some_and(|e| e.found) {
            found += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        found as f64 / total as f64
    }
}
