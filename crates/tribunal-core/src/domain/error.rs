//! Domain-level error taxonomy for audit runs.

/// Tribunal domain errors.
///
/// `Resolution` and `RuleApplication` are terminal for a run; every other
/// variant is recovered locally and recorded in the run log.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("resolution error for {target}: {reason}")]
    Resolution { target: String, reason: String },

    #[error("insufficient evidence for criterion {criterion_id}: {reason}")]
    EvidenceGap {
        criterion_id: String,
        reason: String,
    },

    #[error("opinion validation failed for {criterion_id}/{persona}: {reason}")]
    OpinionValidation {
        criterion_id: String,
        persona: String,
        reason: String,
    },

    #[error("rule table defect in {rule}: {detail}")]
    RuleApplication { rule: String, detail: String },

    #[error("invalid evidence {id}: {reason}")]
    InvalidEvidence { id: String, reason: String },

    #[error("invalid rubric: {0}")]
    InvalidRubric(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{operation} timed out after {limit_ms}ms")]
    Timeout { operation: String, limit_ms: u64 },

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AuditError {
    /// Whether this error must escalate through the run's `fatal` flag.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuditError::Resolution { .. } | AuditError::RuleApplication { .. }
        )
    }
}

/// Result type for Tribunal domain operations.
pub type Result<T> = std::result::Result<T, AuditError>;
