//! Domain models for Tribunal.
//!
//! - `Evidence`: facts emitted by evidence producers
//! - `Opinion`: persona-scoped judgments of one criterion
//! - `Rubric`: the criteria a run scores
//! - `CriterionVerdict` / `AuditReport`: synthesized outcomes

pub mod digest;
pub mod error;
pub mod evidence;
pub mod opinion;
pub mod rubric;
pub mod verdict;

pub use digest::{canonical_json, compute_digest};
pub use error::{AuditError, Result};
pub use evidence::{
    found_ratio, AuditTarget, Evidence, EvidenceBatch, EvidenceMap, ResolutionStatus, SECURITY_TAG,
};
pub use opinion::{Opinion, OpinionResult, Persona, RawResponse, HEURISTIC_MARKER};
pub use rubric::{Criterion, Rubric, ARCHITECTURE_TAGS};
pub use verdict::{AuditReport, CriterionVerdict, RemediationItem, SynthesisRule};
