//! Tribunal core library.
//!
//! Audits a repository (plus an optional architecture report) against a
//! rubric: evidence producers fan out, three personas score every
//! criterion concurrently, and a fixed rule pipeline turns their
//! disagreement into one reproducible verdict per criterion.
//!
//! Most callers only need [`AuditEngine`]:
//!
//! ```no_run
//! # async fn demo() -> Result<(), tribunal_core::EngineError> {
//! use std::sync::Arc;
//! use tribunal_core::{AuditConfig, AuditEngine, AuditTarget, HeuristicOpinionProducer, Rubric};
//!
//! let engine = AuditEngine::new(
//!     Rubric::default_rubric(),
//!     AuditConfig::default(),
//!     Arc::new(HeuristicOpinionProducer),
//! )?;
//! let outcome = engine.run(AuditTarget::new("./some/repo")).await?;
//! println!("overall {:.2}", outcome.report.overall_score);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod git;
pub mod graph;
pub mod obs;
pub mod report;
pub mod state;
pub mod synthesis;
pub mod telemetry;

pub use aggregator::{CompletenessReport, EvidenceRoute};
pub use audit::{AuditEngine, AuditOutcome, EngineError, EngineResult};
pub use collaborators::{
    opinion_producer, DocAnalyst, EvidenceProducer, HeuristicOpinionProducer, HttpOpinionProducer,
    OpinionProducer, RemediationTextProvider, RepoInvestigator, TemplateRemediation,
};
pub use config::{AuditConfig, ProviderConfig, SynthesisConfig};
pub use dispatch::{DispatchOutcome, OpinionDispatcher};
pub use domain::{
    AuditError, AuditReport, AuditTarget, Criterion, CriterionVerdict, Evidence, EvidenceBatch,
    EvidenceMap, Opinion, OpinionResult, Persona, RawResponse, RemediationItem, ResolutionStatus,
    Result, Rubric, SynthesisRule,
};
pub use graph::{CompiledGraph, GraphBuilder, GraphError, GraphResult, Node, NodeStatus};
pub use report::{ReportAssembler, INSUFFICIENT_INPUT, SATISFACTORY_PLACEHOLDER};
pub use state::{PartialUpdate, RunState};
pub use synthesis::synthesize;

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
