//! Persona vocabulary and opinion records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Prefix marking opinions that were computed locally instead of produced
/// by the external opinion producer.
pub const HEURISTIC_MARKER: &str = "[heuristic]";

/// The three fixed evaluative stances that score every criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Persona {
    /// Adversarial stance.
    #[serde(alias = "prosecutor", alias = "adversarial")]
    Prosecutor,
    /// Charitable stance.
    #[serde(alias = "defense", alias = "charitable")]
    Defense,
    /// Pragmatic stance.
    #[serde(alias = "tech_lead", alias = "techlead", alias = "pragmatic")]
    TechLead,
}

impl Persona {
    /// All personas in their fixed evaluation order.
    pub const ALL: [Persona; 3] = [Persona::Prosecutor, Persona::Defense, Persona::TechLead];

    pub fn stance(self) -> &'static str {
        match self {
            Persona::Prosecutor => "adversarial",
            Persona::Defense => "charitable",
            Persona::TechLead => "pragmatic",
        }
    }

    /// Graph node name of the persona's dispatch branch.
    pub fn node_name(self) -> &'static str {
        match self {
            Persona::Prosecutor => "prosecutor",
            Persona::Defense => "defense",
            Persona::TechLead => "tech_lead",
        }
    }

    /// Position in [`Persona::ALL`].
    pub fn index(self) -> usize {
        match self {
            Persona::Prosecutor => 0,
            Persona::Defense => 1,
            Persona::TechLead => 2,
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Persona::Prosecutor => "Prosecutor",
            Persona::Defense => "Defense",
            Persona::TechLead => "TechLead",
        };
        write!(f, "{s}")
    }
}

/// A validated, persona-scoped judgment of one criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opinion {
    pub criterion_id: String,
    pub persona: Persona,
    /// Integer score in 1..=5.
    pub score: u8,
    pub rationale: String,
    /// Evidence ids backing the score. Every id exists in the run's evidence map.
    pub cited_evidence: BTreeSet<String>,
}

impl Opinion {
    /// Whether this opinion came from the local heuristic fallback.
    pub fn is_heuristic(&self) -> bool {
        self.rationale.starts_with(HEURISTIC_MARKER)
    }
}

/// Unvalidated output of an opinion producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum RawResponse {
    /// Structured payload, already parsed as JSON.
    Json(serde_json::Value),
    /// Free text that may or may not embed a JSON object.
    Text(String),
}

/// Outcome of validating (and possibly replacing) a producer response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpinionResult {
    Valid(Opinion),
    Malformed { reason: String },
    HeuristicFallback(Opinion),
}

impl OpinionResult {
    pub fn opinion(&self) -> Option<&Opinion> {
        match self {
            OpinionResult::Valid(op) | OpinionResult::HeuristicFallback(op) => Some(op),
            OpinionResult::Malformed { .. } => None,
        }
    }

    pub fn into_opinion(self) -> Option<Opinion> {
        match self {
            OpinionResult::Valid(op) | OpinionResult::HeuristicFallback(op) => Some(op),
            OpinionResult::Malformed { .. } => None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, OpinionResult::HeuristicFallback(_))
    }
}
