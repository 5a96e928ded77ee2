//! Opinion dispatch and validation.
//!
//! One call per (criterion, persona) pair, each bounded by a timeout. A
//! response that fails validation (or times out, or errors) is retried at
//! most `max_retries` times; after that a heuristic opinion computed from
//! the evidence alone takes its place.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore};

use crate::collaborators::OpinionProducer;
use crate::config::AuditConfig;
use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::{found_ratio, EvidenceMap};
use crate::domain::opinion::{Opinion, OpinionResult, Persona, RawResponse, HEURISTIC_MARKER};
use crate::domain::rubric::Criterion;
use crate::obs;
use crate::state::{PartialUpdate, RunState};

/// Routing key under which a criterion's evidence gap is recorded.
pub fn criterion_routing_key(criterion_id: &str) -> String {
    format!("criterion:{criterion_id}")
}

/// Result of dispatching one (criterion, persona) pair.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: OpinionResult,
    /// Producer calls made, including the failed ones.
    pub attempts: u32,
    /// One line per rejected attempt, plus the fallback note.
    pub logs: Vec<String>,
}

/// Fans opinion requests out to an [`OpinionProducer`].
pub struct OpinionDispatcher {
    producer: Arc<dyn OpinionProducer>,
    timeout: Duration,
    max_retries: u32,
    semaphore: Arc<Semaphore>,
}

impl OpinionDispatcher {
    pub fn new(producer: Arc<dyn OpinionProducer>, config: &AuditConfig) -> Self {
        Self::with_limits(
            producer,
            config.opinion_timeout(),
            config.max_opinion_retries,
            config.max_concurrent_opinions,
        )
    }

    /// `max_retries` is capped at 1.
    pub fn with_limits(
        producer: Arc<dyn OpinionProducer>,
        timeout: Duration,
        max_retries: u32,
        max_concurrent: usize,
    ) -> Self {
        Self {
            producer,
            timeout,
            max_retries: max_retries.min(1),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Obtain exactly one opinion for `criterion` from `persona`.
    ///
    /// Returns [`AuditError::EvidenceGap`] without calling the producer when
    /// the criterion has no relevant evidence at all.
    pub async fn dispatch_one(
        &self,
        criterion: &Criterion,
        persona: Persona,
        evidences: &EvidenceMap,
    ) -> Result<DispatchOutcome> {
        let subset = criterion.relevant_evidence(evidences);
        if subset.is_empty() {
            return Err(AuditError::EvidenceGap {
                criterion_id: criterion.id.clone(),
                reason: "no relevant evidence collected".to_string(),
            });
        }

        let mut logs = Vec::new();
        for attempt in 1..=self.max_retries + 1 {
            let call = self.producer.produce(criterion, persona, &subset);
            let raw = match tokio::time::timeout(self.timeout, call).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => {
                    logs.push(format!(
                        "{}: {} attempt {attempt} failed: {e}",
                        persona.node_name(),
                        criterion.id
                    ));
                    continue;
                }
                Err(_) => {
                    let err = AuditError::Timeout {
                        operation: format!("opinion {}/{}", criterion.id, persona),
                        limit_ms: self.timeout.as_millis() as u64,
                    };
                    logs.push(format!("{}: attempt {attempt}: {err}", persona.node_name()));
                    continue;
                }
            };

            match validate_response(criterion, persona, &raw, evidences) {
                OpinionResult::Malformed { reason } => {
                    let err = AuditError::OpinionValidation {
                        criterion_id: criterion.id.clone(),
                        persona: persona.to_string(),
                        reason,
                    };
                    logs.push(format!("{}: attempt {attempt}: {err}", persona.node_name()));
                }
                accepted => {
                    return Ok(DispatchOutcome {
                        result: accepted,
                        attempts: attempt,
                        logs,
                    })
                }
            }
        }

        let attempts = self.max_retries + 1;
        obs::emit_opinion_fallback(&criterion.id, persona.node_name(), attempts);
        logs.push(format!(
            "{}: {} fell back to heuristic opinion after {attempts} attempt(s)",
            persona.node_name(),
            criterion.id
        ));
        Ok(DispatchOutcome {
            result: OpinionResult::HeuristicFallback(heuristic_opinion(criterion, persona, &subset)),
            attempts,
            logs,
        })
    }

    /// Body of a persona node: one concurrent task per criterion.
    ///
    /// The returned patch lists opinions in rubric order. Criteria with no
    /// relevant evidence are routed to `missing_evidence`.
    pub async fn dispatch_persona(
        self: &Arc<Self>,
        criteria: &[Criterion],
        persona: Persona,
        state: Arc<RunState>,
    ) -> PartialUpdate {
        let results: Arc<Mutex<Vec<(usize, PartialUpdate)>>> = Arc::new(Mutex::new(Vec::new()));
        let mut tasks = Vec::new();

        for (position, criterion) in criteria.iter().enumerate() {
            let dispatcher = Arc::clone(self);
            let results = Arc::clone(&results);
            let state = Arc::clone(&state);
            let criterion = criterion.clone();
            let sem = Arc::clone(&self.semaphore);

            let task = tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let node = persona.node_name();
                let update = match dispatcher
                    .dispatch_one(&criterion, persona, &state.evidences)
                    .await
                {
                    Ok(outcome) => {
                        let mut update = PartialUpdate::new();
                        update.logs = outcome.logs;
                        let kind = if outcome.result.is_fallback() { "heuristic" } else { "valid" };
                        match outcome.result.into_opinion() {
                            Some(opinion) => update
                                .log(format!(
                                    "{node}: {} scored {} ({kind}, {} attempt(s))",
                                    criterion.id, opinion.score, outcome.attempts
                                ))
                                .opinion(opinion),
                            None => update,
                        }
                    }
                    Err(e) => PartialUpdate::new()
                        .log(format!("{node}: {e}"))
                        .route(criterion_routing_key(&criterion.id), "missing_evidence"),
                };
                results.lock().await.push((position, update));
            });
            tasks.push(task);
        }

        let mut update = PartialUpdate::new();
        let mut failures = Vec::new();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(persona = %persona, error = %e, "opinion task failed");
                failures.push(format!("{}: opinion task failed: {e}", persona.node_name()));
            }
        }

        let mut collected = std::mem::take(&mut *results.lock().await);
        collected.sort_by_key(|(position, _)| *position);
        for (_, part) in collected {
            update.extend(part);
        }
        for line in failures {
            update = update.log(line);
        }
        update
    }
}

#[derive(Debug, Deserialize)]
struct OpinionWire {
    #[serde(default)]
    criterion_id: Option<String>,
    score: serde_json::Value,
    #[serde(alias = "argument")]
    rationale: String,
    #[serde(default)]
    cited_evidence: Vec<String>,
}

fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn integral_score(value: &serde_json::Value) -> std::result::Result<u8, String> {
    let n = value
        .as_f64()
        .ok_or_else(|| format!("score {value} is not a number"))?;
    if n.fract() != 0.0 {
        return Err(format!("score {n} is not integral"));
    }
    if !(1.0..=5.0).contains(&n) {
        return Err(format!("score {n} outside 1..=5"));
    }
    Ok(n as u8)
}

/// Check a raw response against the opinion invariants.
///
/// Never returns [`OpinionResult::HeuristicFallback`].
pub fn validate_response(
    criterion: &Criterion,
    persona: Persona,
    raw: &RawResponse,
    evidences: &EvidenceMap,
) -> OpinionResult {
    let value = match raw {
        RawResponse::Json(value) => value.clone(),
        RawResponse::Text(text) => match extract_json(text) {
            Some(value) => value,
            None => {
                return OpinionResult::Malformed {
                    reason: "response contains no JSON object".to_string(),
                }
            }
        },
    };

    let wire: OpinionWire = match serde_json::from_value(value) {
        Ok(wire) => wire,
        Err(e) => {
            return OpinionResult::Malformed {
                reason: format!("response shape: {e}"),
            }
        }
    };

    if let Some(id) = &wire.criterion_id {
        if *id != criterion.id {
            return OpinionResult::Malformed {
                reason: format!("criterion_id {id} does not match {}", criterion.id),
            };
        }
    }
    let score = match integral_score(&wire.score) {
        Ok(score) => score,
        Err(reason) => return OpinionResult::Malformed { reason },
    };
    if wire.rationale.trim().is_empty() {
        return OpinionResult::Malformed {
            reason: "empty rationale".to_string(),
        };
    }
    let unknown: Vec<&String> = wire
        .cited_evidence
        .iter()
        .filter(|id| !evidences.contains_key(*id))
        .collect();
    if !unknown.is_empty() {
        return OpinionResult::Malformed {
            reason: format!(
                "cites unknown evidence: {}",
                unknown.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ),
        };
    }

    OpinionResult::Valid(Opinion {
        criterion_id: criterion.id.clone(),
        persona,
        score,
        rationale: wire.rationale,
        cited_evidence: wire.cited_evidence.into_iter().collect(),
    })
}

/// Deterministic persona score from a found ratio.
pub fn heuristic_score(persona: Persona, ratio: f64) -> u8 {
    match persona {
        Persona::Prosecutor => {
            if ratio > 0.7 {
                2
            } else {
                1
            }
        }
        Persona::Defense => {
            if ratio > 0.5 {
                5
            } else {
                4
            }
        }
        Persona::TechLead => {
            if ratio > 0.8 {
                5
            } else if ratio > 0.4 {
                3
            } else {
                1
            }
        }
    }
}

/// Opinion computed from the evidence subset alone, citing all of it.
pub fn heuristic_opinion(criterion: &Criterion, persona: Persona, subset: &EvidenceMap) -> Opinion {
    let cited: BTreeSet<String> = subset.keys().cloned().collect();
    let ratio = found_ratio(&cited, subset);
    Opinion {
        criterion_id: criterion.id.clone(),
        persona,
        score: heuristic_score(persona, ratio),
        rationale: format!(
            "{HEURISTIC_MARKER} {persona} opinion derived from found_ratio={ratio:.2} of cited evidence"
        ),
        cited_evidence: cited,
    }
}
