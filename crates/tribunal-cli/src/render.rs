//! Markdown rendering of a finished audit report.

use tribunal_core::{AuditReport, Persona, Rubric};

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render `report` as a Markdown document.
///
/// `rubric` supplies display names; criteria it does not know are shown by id.
pub fn render_markdown(report: &AuditReport, rubric: &Rubric) -> String {
    let name_of = |id: &str| {
        rubric
            .criterion(id)
            .map(|c| c.display_name().to_string())
            .unwrap_or_else(|| id.to_string())
    };

    let mut md = String::from("# Audit Report\n\n");
    md.push_str(&format!("- Run: `{}`\n", report.run_id));
    md.push_str(&format!("- Generated: {}\n", report.generated_at.to_rfc3339()));
    md.push_str(&format!("- Overall score: **{:.2} / 5**\n", report.overall_score));
    if report.degraded {
        md.push_str("- Status: degraded (some criteria were not fully evaluated)\n");
    }

    md.push_str("\n## Executive Summary\n\n");
    md.push_str("| Criterion | Score | Rules |\n");
    md.push_str("|---|---|---|\n");
    for verdict in &report.criteria {
        let rules: Vec<&str> = verdict.rule_trace.iter().map(|r| r.as_str()).collect();
        md.push_str(&format!(
            "| {} | {} | {} |\n",
            escape_cell(&name_of(&verdict.criterion_id)),
            verdict.final_score,
            if rules.is_empty() { "-".to_string() } else { rules.join(", ") }
        ));
    }

    md.push_str("\n## Criterion Breakdown\n");
    for verdict in &report.criteria {
        md.push_str(&format!(
            "\n### {} ({})\n\n",
            name_of(&verdict.criterion_id),
            verdict.criterion_id
        ));
        md.push_str(&format!("- Final score: {}\n", verdict.final_score));
        if !verdict.persona_scores.is_empty() {
            let scores: Vec<String> = Persona::ALL
                .iter()
                .filter_map(|p| verdict.persona_scores.get(p).map(|s| format!("{p} {s}")))
                .collect();
            md.push_str(&format!("- Persona scores: {}\n", scores.join(", ")));
        }
        if !verdict.rule_trace.is_empty() {
            let rules: Vec<&str> = verdict.rule_trace.iter().map(|r| r.as_str()).collect();
            md.push_str(&format!("- Rule trace: {}\n", rules.join(" -> ")));
        }
        md.push_str(&format!("- Explanation: {}\n", verdict.explanation));
        if let Some(dissent) = &verdict.dissent_summary {
            md.push_str(&format!("- Dissent: {dissent}\n"));
        }
    }

    md.push_str("\n## Remediation Plan\n\n");
    for (i, item) in report.remediation_plan.iter().enumerate() {
        md.push_str(&format!(
            "{}. **{}** (score {}): {}\n",
            i + 1,
            name_of(&item.criterion_id),
            item.final_score,
            item.text
        ));
    }

    md.push_str("\n## Evidence Index\n\n");
    if report.evidence_index.is_empty() {
        md.push_str("No evidence was collected.\n");
    } else {
        md.push_str("| Id | Found | Confidence | Location | Rationale |\n");
        md.push_str("|---|---|---|---|---|\n");
        for evidence in report.evidence_index.values() {
            md.push_str(&format!(
                "| `{}` | {} | {:.2} | {} | {} |\n",
                evidence.id,
                if evidence.found { "yes" } else { "no" },
                evidence.confidence,
                escape_cell(&evidence.location),
                escape_cell(&evidence.rationale)
            ));
        }
    }

    md.push_str("\n## Execution Log\n\n");
    md.push_str("```text\n");
    for line in &report.logs {
        md.push_str(line);
        md.push('\n');
    }
    md.push_str("```\n");
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> AuditReport {
        serde_json::from_value(json!({
            "run_id": "00000000-0000-0000-0000-000000000000",
            "generated_at": "2026-01-01T00:00:00Z",
            "criteria": [{
                "criterion_id": "C4_Security",
                "final_score": 3,
                "rule_trace": ["security_override"],
                "dissent_summary": null,
                "persona_scores": {"Prosecutor": 2, "Defense": 5, "TechLead": 4},
                "explanation": "capped",
            }],
            "overall_score": 3.0,
            "remediation_plan": [{"criterion_id": "C4_Security", "final_score": 3, "text": "Fix it."}],
            "evidence_index": {
                "repo.security_scan": {
                    "id": "repo.security_scan",
                    "goal": "g",
                    "found": true,
                    "location": "tools/run.py:2",
                    "rationale": "risky | call",
                    "confidence": 0.75,
                    "tags": ["security"],
                }
            },
            "dissent_log": [],
            "degraded": false,
            "logs": ["intake: start"],
        }))
        .unwrap()
    }

    #[test]
    fn test_markdown_sections() {
        let md = render_markdown(&report(), &Rubric::default_rubric());
        assert!(md.starts_with("# Audit Report"));
        assert!(md.contains("| Safe Tool Engineering | 3 | security_override |"));
        assert!(md.contains("- Persona scores: Prosecutor 2, Defense 5, TechLead 4"));
        assert!(md.contains("1. **Safe Tool Engineering** (score 3): Fix it."));
        assert!(md.contains("risky \\| call"));
        assert!(md.contains("intake: start"));
        assert!(!md.contains("degraded"));
        assert!(md.ends_with("intake: start\n```\n"));
        assert!(md.contains("\n## Executive Summary\n\n| Criterion | Score | Rules |\n|---|---|---|\n"));
    }

    #[test]
    fn test_unknown_criterion_shown_by_id() {
        let rubric = Rubric::from_json_str(r#"{"criteria": [{"id": "Other"}]}"#).unwrap();
        let md = render_markdown(&report(), &rubric);
        assert!(md.contains("### C4_Security (C4_Security)"));
    }
}
