//! Offline opinion producer.

use async_trait::async_trait;
use serde_json::json;

use crate::collaborators::OpinionProducer;
use crate::dispatch::heuristic_opinion;
use crate::domain::error::Result;
use crate::domain::evidence::EvidenceMap;
use crate::domain::opinion::{Persona, RawResponse};
use crate::domain::rubric::Criterion;

/// Scores from the found ratio of the supplied evidence, with no model call.
///
/// Used when no provider endpoint is configured, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOpinionProducer;

#[async_trait]
impl OpinionProducer for HeuristicOpinionProducer {
    async fn produce(
        &self,
        criterion: &Criterion,
        persona: Persona,
        evidence: &EvidenceMap,
    ) -> Result<RawResponse> {
        let opinion = heuristic_opinion(criterion, persona, evidence);
        Ok(RawResponse::Json(json!({
            "criterion_id": opinion.criterion_id,
            "score": opinion.score,
            "rationale": opinion.rationale,
            "cited_evidence": opinion.cited_evidence,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::validate_response;
    use crate::domain::evidence::Evidence;

    #[tokio::test]
    async fn test_heuristic_response_validates() {
        let mut evidences = EvidenceMap::new();
        evidences.insert(
            "repo.a".to_string(),
            Evidence::new("repo.a", "g", true, "l", "r", 0.9).unwrap(),
        );
        let criterion = Criterion::new("C1", "One");
        let raw = HeuristicOpinionProducer
            .produce(&criterion, Persona::Defense, &evidences)
            .await
            .unwrap();
        let result = validate_response(&criterion, Persona::Defense, &raw, &evidences);
        let opinion = result.opinion().unwrap();
        assert_eq!(opinion.score, 5);
        assert!(opinion.is_heuristic());
    }
}
