//! Properties of the synthesis rule pipeline.

use std::collections::BTreeSet;

use tribunal_core::domain::SECURITY_TAG;
use tribunal_core::{
    synthesize, Criterion, Evidence, EvidenceMap, Opinion, Persona, SynthesisConfig, SynthesisRule,
};

fn opinion(persona: Persona, score: u8, cites: &[&str]) -> Opinion {
    Opinion {
        criterion_id: "C1".to_string(),
        persona,
        score,
        rationale: format!("{persona} argues for {score}"),
        cited_evidence: cites.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
    }
}

fn triple(scores: [u8; 3], cites: &[&str]) -> Vec<Opinion> {
    Persona::ALL
        .iter()
        .zip(scores)
        .map(|(p, s)| opinion(*p, s, cites))
        .collect()
}

fn evidence_map(items: &[(&str, bool, bool)]) -> EvidenceMap {
    items
        .iter()
        .map(|(id, found, security)| {
            let mut e = Evidence::new(*id, "goal", *found, "somewhere", "because", 0.8).unwrap();
            if *security {
                e = e.with_tag(SECURITY_TAG);
            }
            (id.to_string(), e)
        })
        .collect()
}

#[test]
fn test_end_to_end_scenario_without_rules() {
    let evidences = evidence_map(&[("repo.state_structure", true, false)]);
    let verdict = synthesize(
        &Criterion::new("C1", "State"),
        &triple([3, 4, 4], &["repo.state_structure"]),
        &evidences,
        &SynthesisConfig::default(),
    )
    .unwrap();

    assert_eq!(verdict.final_score, 4);
    assert!(verdict.rule_trace.is_empty());
    assert_eq!(verdict.dissent_summary, None);
    assert!(!verdict.degraded);
}

#[test]
fn test_security_override_caps_every_score_combination() {
    let evidences = evidence_map(&[("repo.security_scan", true, true)]);
    let config = SynthesisConfig::default();
    for criterion in [
        Criterion::new("C1", ""),
        Criterion::new("C1", "").with_tag("architecture"),
    ] {
        for p in 1..=5u8 {
            for d in 1..=5u8 {
                for t in 1..=5u8 {
                    let verdict = synthesize(
                        &criterion,
                        &triple([p, d, t], &["repo.security_scan"]),
                        &evidences,
                        &config,
                    )
                    .unwrap();
                    assert!(verdict.final_score <= 3, "{p}/{d}/{t} -> {}", verdict.final_score);
                    assert!(verdict.rule_trace.contains(&SynthesisRule::SecurityOverride));
                }
            }
        }
    }
}

#[test]
fn test_security_evidence_not_found_does_not_cap() {
    let evidences = evidence_map(&[("repo.security_scan", false, true)]);
    let config = SynthesisConfig {
        fact_dampening: 0.0,
        ..SynthesisConfig::default()
    };
    let verdict = synthesize(
        &Criterion::new("C1", ""),
        &triple([5, 5, 5], &["repo.security_scan"]),
        &evidences,
        &config,
    )
    .unwrap();
    assert_eq!(verdict.final_score, 5);
    assert!(!verdict.rule_trace.contains(&SynthesisRule::SecurityOverride));
}

#[test]
fn test_variance_uses_median_and_records_dissent() {
    let verdict = synthesize(
        &Criterion::new("C1", ""),
        &triple([2, 5, 5], &[]),
        &EvidenceMap::new(),
        &SynthesisConfig::default(),
    )
    .unwrap();

    assert_eq!(verdict.final_score, 5);
    assert_eq!(
        verdict.rule_trace,
        vec![SynthesisRule::VarianceReEvaluation, SynthesisRule::DissentRequirement]
    );
    let dissent = verdict.dissent_summary.unwrap();
    assert!(dissent.starts_with("P/D/T = 2/5/5"));
    assert!(dissent.contains("most divergent Prosecutor: Prosecutor argues for 2"));
}

#[test]
fn test_variance_after_security_override_keeps_ceiling() {
    let evidences = evidence_map(&[("repo.security_scan", true, true)]);
    let config = SynthesisConfig {
        security_ceiling: 4,
        ..SynthesisConfig::default()
    };
    let verdict = synthesize(
        &Criterion::new("C1", ""),
        &triple([2, 5, 5], &["repo.security_scan"]),
        &evidences,
        &config,
    )
    .unwrap();

    assert_eq!(verdict.final_score, 4);
    assert_eq!(
        verdict.rule_trace,
        vec![
            SynthesisRule::SecurityOverride,
            SynthesisRule::VarianceReEvaluation,
            SynthesisRule::DissentRequirement,
        ]
    );
    assert!(verdict.dissent_summary.is_some());
}

#[test]
fn test_fact_supremacy_pulls_unsupported_scores_down() {
    let evidences = evidence_map(&[("repo.graph_wiring", false, false)]);
    let verdict = synthesize(
        &Criterion::new("C1", ""),
        &triple([5, 5, 5], &["repo.graph_wiring"]),
        &evidences,
        &SynthesisConfig::default(),
    )
    .unwrap();

    assert!(verdict.final_score < 5);
    assert_eq!(verdict.final_score, 3);
    assert_eq!(verdict.rule_trace, vec![SynthesisRule::FactSupremacy]);
}

#[test]
fn test_rule_trace_follows_pipeline_order() {
    let evidences = evidence_map(&[("repo.a", false, false), ("repo.security_scan", true, true)]);
    let verdict = synthesize(
        &Criterion::new("C1", "").with_tag("orchestration"),
        &vec![
            opinion(Persona::Prosecutor, 1, &["repo.security_scan"]),
            opinion(Persona::Defense, 5, &["repo.a"]),
            opinion(Persona::TechLead, 4, &["repo.a"]),
        ],
        &evidences,
        &SynthesisConfig::default(),
    )
    .unwrap();

    let positions: Vec<usize> = verdict
        .rule_trace
        .iter()
        .map(|r| SynthesisRule::PIPELINE.iter().position(|p| p == r).unwrap())
        .collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
    assert_eq!(verdict.rule_trace, SynthesisRule::PIPELINE.to_vec());
    assert!(verdict.final_score <= 3);
}

#[test]
fn test_synthesis_is_idempotent() {
    let evidences = evidence_map(&[("repo.a", true, false), ("repo.b", false, false)]);
    let opinions = vec![
        opinion(Persona::Prosecutor, 1, &["repo.b"]),
        opinion(Persona::Defense, 5, &["repo.a", "repo.b"]),
        opinion(Persona::TechLead, 3, &["repo.a"]),
    ];
    let criterion = Criterion::new("C1", "").with_tag("architecture");
    let config = SynthesisConfig::default();

    let first = synthesize(&criterion, &opinions, &evidences, &config).unwrap();
    let second = synthesize(&criterion, &opinions, &evidences, &config).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first).unwrap(),
        serde_json::to_vec(&second).unwrap()
    );
    assert_eq!(first.digest().unwrap(), second.digest().unwrap());

    let mut shuffled = opinions.clone();
    shuffled.reverse();
    let third = synthesize(&criterion, &shuffled, &evidences, &config).unwrap();
    assert_eq!(first, third);
}
