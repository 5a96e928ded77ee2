//! Architecture report analyst.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::collaborators::EvidenceProducer;
use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::{AuditTarget, Evidence, EvidenceBatch};

/// Concepts an architecture report is expected to discuss, with the phrases
/// that count as a mention.
const CONCEPTS: [(&str, &[&str]); 4] = [
    ("fan-out/fan-in", &["fan-out", "fan-in", "fan out", "fan in"]),
    ("dialectical synthesis", &["dialectic"]),
    ("metacognition", &["metacognition", "metacognitive"]),
    ("state synchronization", &["state synchronization", "state synchronisation", "reducer"]),
];

/// Produces `doc.*` evidence from the optional architecture report.
#[derive(Debug, Clone, Default)]
pub struct DocAnalyst;

fn cited_paths(report: &str) -> Result<BTreeSet<String>> {
    let re = Regex::new(r"\b(?:src|tests|audit|crates)/[\w./-]+")
        .map_err(|e| AuditError::Collaborator(format!("bad citation pattern: {e}")))?;
    Ok(re
        .find_iter(report)
        .map(|m| m.as_str().trim_end_matches(['.', '/']).to_string())
        .collect())
}

impl DocAnalyst {
    fn citation_check(&self, report: &str, target: &AuditTarget) -> Result<Evidence> {
        let cited = cited_paths(report)?;
        let goal = "Verify that paths cited in the report exist in the repository.";

        if cited.is_empty() {
            return Evidence::new(
                "doc.citation_check",
                goal,
                false,
                "",
                "Report cites no repository paths.",
                0.6,
            );
        }
        if target.is_remote() {
            return Ok(Evidence::new(
                "doc.citation_check",
                goal,
                false,
                "",
                "Citations cannot be checked against a remote target without a local checkout.",
                0.3,
            )?
            .with_content(cited.into_iter().collect::<Vec<_>>().join("\n")));
        }

        let root = Path::new(&target.repo);
        let (present, missing): (Vec<&String>, Vec<&String>) =
            cited.iter().partition(|rel| root.join(rel.as_str()).exists());
        let mut content = Vec::new();
        content.extend(present.iter().map(|p| format!("ok {p}")));
        content.extend(missing.iter().map(|p| format!("missing {p}")));

        Ok(Evidence::new(
            "doc.citation_check",
            goal,
            missing.is_empty(),
            missing.first().map(|p| p.as_str()).unwrap_or(""),
            format!("{} of {} cited path(s) exist.", present.len(), cited.len()),
            0.9,
        )?
        .with_content(content.join("\n")))
    }

    fn concept_verification(&self, report: &str) -> Result<Evidence> {
        let lower = report.to_lowercase();
        let (mentioned, absent): (Vec<&str>, Vec<&str>) = CONCEPTS
            .iter()
            .map(|(concept, phrases)| (*concept, phrases.iter().any(|p| lower.contains(p))))
            .fold((Vec::new(), Vec::new()), |(mut yes, mut no), (concept, hit)| {
                if hit {
                    yes.push(concept);
                } else {
                    no.push(concept);
                }
                (yes, no)
            });
        Ok(Evidence::new(
            "doc.concept_verification",
            "Check that the report explains the key architectural concepts.",
            absent.is_empty(),
            "",
            format!("mentioned: [{}]; absent: [{}]", mentioned.join(", "), absent.join(", ")),
            0.7,
        )?
        .with_tag("architecture"))
    }
}

#[async_trait]
impl EvidenceProducer for DocAnalyst {
    fn name(&self) -> &str {
        "doc_analyst"
    }

    async fn produce(&self, target: &AuditTarget) -> Result<EvidenceBatch> {
        let Some(path) = &target.report else {
            debug!("no architecture report supplied");
            return Ok(EvidenceBatch::ok(Vec::new()).with_detail("no architecture report supplied; skipped"));
        };
        let report = tokio::fs::read_to_string(path).await?;
        let evidences = vec![
            located(self.citation_check(&report, target)?, path),
            located(self.concept_verification(&report)?, path),
        ];
        Ok(EvidenceBatch::ok(evidences).with_detail(format!("analysed {}", path.display())))
    }
}

/// Point evidence without a more specific location at the report itself.
fn located(mut evidence: Evidence, report: &Path) -> Evidence {
    if evidence.location.is_empty() {
        evidence.location = report.display().to_string();
    }
    evidence
}
