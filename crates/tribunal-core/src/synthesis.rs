//! Deterministic verdict synthesis.
//!
//! Three persona opinions plus the evidence they cite go through a fixed
//! rule pipeline (see [`SynthesisRule::PIPELINE`]). The pipeline is a pure
//! function of its inputs: the same opinions and evidence always yield a
//! byte-identical [`CriterionVerdict`].

use std::collections::{BTreeMap, BTreeSet};

use crate::config::SynthesisConfig;
use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::{found_ratio, EvidenceMap, SECURITY_TAG};
use crate::domain::opinion::{Opinion, Persona};
use crate::domain::rubric::Criterion;
use crate::domain::verdict::{CriterionVerdict, SynthesisRule};

const EXCERPT_CHARS: usize = 120;

fn rule_error(rule: &str, detail: impl Into<String>) -> AuditError {
    AuditError::RuleApplication {
        rule: rule.to_string(),
        detail: detail.into(),
    }
}

fn weighted_mean(scores: &[f64; 3], weights: &[f64; 3]) -> f64 {
    let total: f64 = weights.iter().sum();
    scores.iter().zip(weights).map(|(s, w)| s * w).sum::<f64>() / total
}

fn median(scores: &[u8; 3]) -> u8 {
    let mut sorted = *scores;
    sorted.sort_unstable();
    sorted[1]
}

/// Round half up onto the integer rubric scale.
fn to_rubric_score(running: f64) -> u8 {
    (running + 0.5).floor().clamp(1.0, 5.0) as u8
}

fn excerpt(rationale: &str) -> String {
    let line = rationale.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() > EXCERPT_CHARS {
        let cut: String = line.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

/// Pick exactly one opinion per persona for `criterion_id`.
fn persona_triplet<'a>(criterion_id: &str, opinions: &'a [Opinion]) -> Result<[&'a Opinion; 3]> {
    let mut slots: [Option<&Opinion>; 3] = [None, None, None];
    for opinion in opinions.iter().filter(|o| o.criterion_id == criterion_id) {
        let slot = &mut slots[opinion.persona.index()];
        if slot.is_some() {
            return Err(rule_error(
                "base_aggregation",
                format!("duplicate {} opinion for {criterion_id}", opinion.persona),
            ));
        }
        if !(1..=5).contains(&opinion.score) {
            return Err(rule_error(
                "base_aggregation",
                format!("{} score {} outside 1..=5", opinion.persona, opinion.score),
            ));
        }
        *slot = Some(opinion);
    }
    match slots {
        [Some(p), Some(d), Some(t)] => Ok([p, d, t]),
        _ => {
            let missing: Vec<String> = Persona::ALL
                .iter()
                .filter(|p| slots[p.index()].is_none())
                .map(|p| p.to_string())
                .collect();
            Err(rule_error(
                "base_aggregation",
                format!("missing {} opinion(s) for {criterion_id}", missing.join(", ")),
            ))
        }
    }
}

/// Synthesize one criterion.
///
/// `opinions` may contain opinions for other criteria; only those for
/// `criterion` are used and there must be exactly one per persona.
/// Any violation is a [`AuditError::RuleApplication`].
pub fn synthesize(
    criterion: &Criterion,
    opinions: &[Opinion],
    evidences: &EvidenceMap,
    config: &SynthesisConfig,
) -> Result<CriterionVerdict> {
    let triplet = persona_triplet(&criterion.id, opinions)?;
    let raw: [u8; 3] = [triplet[0].score, triplet[1].score, triplet[2].score];
    let mut effective: [f64; 3] = raw.map(f64::from);
    let mut trace = Vec::new();
    let mut notes = Vec::new();

    let weights = if criterion.is_architectural() {
        [1.0, 1.0, 2.0]
    } else {
        [1.0, 1.0, 1.0]
    };
    let mut running = weighted_mean(&effective, &[1.0, 1.0, 1.0]);
    notes.push(format!(
        "mean of P/D/T = {}/{}/{} is {running:.2}",
        raw[0], raw[1], raw[2]
    ));

    if criterion.is_architectural() {
        running = weighted_mean(&effective, &weights);
        trace.push(SynthesisRule::FunctionalityWeight);
        notes.push(format!("TechLead weighted double: {running:.2}"));
    }

    let mut dampened = Vec::new();
    for (i, opinion) in triplet.iter().enumerate() {
        let unsupported: Vec<&String> = opinion
            .cited_evidence
            .iter()
            .filter(|id| !evidences.get(*id).is_some_and(|e| e.found))
            .collect();
        if unsupported.is_empty() {
            continue;
        }
        let others_min = (0..3)
            .filter(|&j| j != i)
            .map(|j| f64::from(raw[j]))
            .fold(f64::INFINITY, f64::min);
        let support = found_ratio(&opinion.cited_evidence, evidences);
        let floor = others_min.min(1.0 + 4.0 * support);
        if effective[i] > floor && config.fact_dampening > 0.0 {
            effective[i] -= config.fact_dampening * (effective[i] - floor);
            dampened.push(format!(
                "{} ({} unsupported)",
                opinion.persona,
                unsupported.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }
    }
    if !dampened.is_empty() {
        running = weighted_mean(&effective, &weights);
        trace.push(SynthesisRule::FactSupremacy);
        notes.push(format!("dampened {}: {running:.2}", dampened.join("; ")));
    }

    let cited: BTreeSet<&String> = triplet.iter().flat_map(|o| o.cited_evidence.iter()).collect();
    let security_hit = cited.iter().any(|id| {
        evidences
            .get(*id)
            .is_some_and(|e| e.found && e.has_tag(SECURITY_TAG))
    });
    let ceiling = f64::from(config.security_ceiling);
    if security_hit {
        running = running.min(ceiling);
        trace.push(SynthesisRule::SecurityOverride);
        notes.push(format!("confirmed security finding caps score at {ceiling}"));
    }

    let spread = raw.iter().max().copied().unwrap_or(0) - raw.iter().min().copied().unwrap_or(0);
    let high_variance = spread > config.variance_threshold;
    if high_variance {
        running = f64::from(median(&raw));
        if security_hit {
            running = running.min(ceiling);
        }
        trace.push(SynthesisRule::VarianceReEvaluation);
        notes.push(format!("spread {spread} replaced by median: {running:.2}"));
    }

    let dissent_summary = if high_variance {
        let mid = median(&raw);
        let divergent = (0..3)
            .max_by(|&a, &b| {
                let da = raw[a].abs_diff(mid);
                let db = raw[b].abs_diff(mid);
                // Ties resolve to the earlier persona.
                da.cmp(&db).then(b.cmp(&a))
            })
            .unwrap_or(0);
        trace.push(SynthesisRule::DissentRequirement);
        Some(format!(
            "P/D/T = {}/{}/{}; most divergent {}: {}",
            raw[0],
            raw[1],
            raw[2],
            triplet[divergent].persona,
            excerpt(&triplet[divergent].rationale)
        ))
    } else {
        None
    };

    if !running.is_finite() {
        return Err(rule_error("final_score", format!("non-finite running score {running}")));
    }
    let final_score = to_rubric_score(running);
    notes.push(format!("final {final_score}"));

    let persona_scores: BTreeMap<Persona, u8> = triplet.iter().map(|o| (o.persona, o.score)).collect();

    Ok(CriterionVerdict {
        criterion_id: criterion.id.clone(),
        final_score,
        rule_trace: trace,
        dissent_summary,
        persona_scores,
        explanation: notes.join("; "),
        degraded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evidence::Evidence;

    fn op(persona: Persona, score: u8, cites: &[&str]) -> Opinion {
        Opinion {
            criterion_id: "C1".to_string(),
            persona,
            score,
            rationale: format!("{persona} says {score}"),
            cited_evidence: cites.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn triple(p: u8, d: u8, t: u8) -> Vec<Opinion> {
        vec![
            op(Persona::Prosecutor, p, &[]),
            op(Persona::Defense, d, &[]),
            op(Persona::TechLead, t, &[]),
        ]
    }

    #[test]
    fn test_plain_mean_rounds_half_up() {
        let v = synthesize(&Criterion::new("C1", ""), &triple(2, 3, 4), &EvidenceMap::new(), &SynthesisConfig::default()).unwrap();
        assert_eq!(v.final_score, 3);
        let v = synthesize(&Criterion::new("C1", ""), &triple(3, 3, 4), &EvidenceMap::new(), &SynthesisConfig::default()).unwrap();
        assert_eq!(v.final_score, 3);
        assert!(v.rule_trace.is_empty());
    }

    #[test]
    fn test_functionality_weight_on_architecture() {
        let criterion = Criterion::new("C1", "").with_tag("architecture");
        // (2 + 2 + 2*5) / 4 = 3.5 -> 4; unweighted would be 3.
        let v = synthesize(&criterion, &triple(2, 2, 5), &EvidenceMap::new(), &SynthesisConfig::default()).unwrap();
        assert_eq!(v.final_score, 4);
        assert_eq!(v.rule_trace[0], SynthesisRule::FunctionalityWeight);
    }

    #[test]
    fn test_missing_persona_is_rule_error() {
        let mut ops = triple(3, 3, 3);
        ops.pop();
        let err = synthesize(&Criterion::new("C1", ""), &ops, &EvidenceMap::new(), &SynthesisConfig::default()).unwrap_err();
        assert!(matches!(err, AuditError::RuleApplication { .. }));
        assert!(err.to_string().contains("TechLead"));
    }

    #[test]
    fn test_duplicate_persona_is_rule_error() {
        let mut ops = triple(3, 3, 3);
        ops.push(op(Persona::Defense, 4, &[]));
        assert!(synthesize(&Criterion::new("C1", ""), &ops, &EvidenceMap::new(), &SynthesisConfig::default()).is_err());
    }

    #[test]
    fn test_zero_dampening_disables_fact_supremacy() {
        let mut evidences = EvidenceMap::new();
        evidences.insert(
            "repo.x".to_string(),
            Evidence::new("repo.x", "g", false, "l", "r", 0.5).unwrap(),
        );
        let ops = vec![
            op(Persona::Prosecutor, 5, &["repo.x"]),
            op(Persona::Defense, 5, &["repo.x"]),
            op(Persona::TechLead, 5, &["repo.x"]),
        ];
        let config = SynthesisConfig {
            fact_dampening: 0.0,
            ..SynthesisConfig::default()
        };
        let v = synthesize(&Criterion::new("C1", ""), &ops, &evidences, &config).unwrap();
        assert_eq!(v.final_score, 5);
        assert!(v.rule_trace.is_empty());
    }

    #[test]
    fn test_excerpt_truncates_first_line() {
        let long = "x".repeat(200);
        assert_eq!(excerpt(&format!("\n  {long}\nsecond")).chars().count(), EXCERPT_CHARS + 3);
        assert_eq!(excerpt("short\nmore"), "short");
    }
}
