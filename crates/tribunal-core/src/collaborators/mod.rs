//! Collaborator interfaces consumed by the audit core, and their reference
//! implementations.
//!
//! - [`repo`]: `RepoInvestigator`, evidence from a git repository
//! - [`doc`]: `DocAnalyst`, evidence from the architecture report
//! - [`heuristic`]: `HeuristicOpinionProducer`, offline opinions
//! - [`http`]: `HttpOpinionProducer`, OpenAI-compatible chat endpoint
//! - [`remediation`]: `TemplateRemediation`

pub mod doc;
pub mod heuristic;
pub mod http;
pub mod remediation;
pub mod repo;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::domain::error::Result;
use crate::domain::evidence::{AuditTarget, EvidenceBatch, EvidenceMap};
use crate::domain::opinion::{Persona, RawResponse};
use crate::domain::rubric::Criterion;
use crate::domain::verdict::SynthesisRule;

pub use doc::DocAnalyst;
pub use heuristic::HeuristicOpinionProducer;
pub use http::HttpOpinionProducer;
pub use remediation::TemplateRemediation;
pub use repo::RepoInvestigator;

/// Produces evidence about an audit target.
///
/// An unreachable target is reported through
/// [`EvidenceBatch::fatal`], not as an `Err`. An `Err` is treated as a
/// failed branch and only logged.
#[async_trait]
pub trait EvidenceProducer: Send + Sync {
    /// Stable name, also used as the graph node name.
    fn name(&self) -> &str;

    async fn produce(&self, target: &AuditTarget) -> Result<EvidenceBatch>;
}

/// Produces one raw, unvalidated opinion.
#[async_trait]
pub trait OpinionProducer: Send + Sync {
    async fn produce(
        &self,
        criterion: &Criterion,
        persona: Persona,
        evidence: &EvidenceMap,
    ) -> Result<RawResponse>;
}

/// Supplies the remediation text for a scored criterion.
pub trait RemediationTextProvider: Send + Sync {
    fn remediation_text(&self, criterion_id: &str, final_score: u8, rule_trace: &[SynthesisRule]) -> String;
}

/// Build the opinion producer selected by `config`.
pub fn opinion_producer(config: &ProviderConfig) -> Result<Arc<dyn OpinionProducer>> {
    match config {
        ProviderConfig::Heuristic => Ok(Arc::new(HeuristicOpinionProducer)),
        ProviderConfig::Http {
            endpoint,
            model,
            api_key,
        } => Ok(Arc::new(HttpOpinionProducer::new(
            endpoint.clone(),
            model.clone(),
            api_key.clone(),
        )?)),
    }
}
