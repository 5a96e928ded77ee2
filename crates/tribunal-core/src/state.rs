//! Shared run state and its per-key reducers.
//!
//! Nodes never mutate [`RunState`] directly. They return a sparse
//! [`PartialUpdate`] and the scheduler folds it in with [`RunState::apply`]:
//!
//! | key         | reducer                                   |
//! |-------------|-------------------------------------------|
//! | `evidences` | union by id, last writer wins on collision |
//! | `opinions`  | append                                    |
//! | `logs`      | append                                    |
//! | `routing`   | union by key, last writer wins            |
//! | `fatal`     | first reason wins, never cleared          |
//! | `verdicts`  | append                                    |
//! | `report`    | set once                                  |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::evidence::{Evidence, EvidenceMap};
use crate::domain::opinion::{Opinion, Persona};
use crate::domain::verdict::{AuditReport, CriterionVerdict};

/// The record threaded through every node of an audit run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub evidences: EvidenceMap,
    /// Completion order; not stable across runs.
    pub opinions: Vec<Opinion>,
    pub logs: Vec<String>,
    /// Phase or criterion key to decision label.
    pub routing: BTreeMap<String, String>,
    /// Terminal failure reason. Sticky once set.
    pub fatal: Option<String>,
    pub verdicts: Vec<CriterionVerdict>,
    pub report: Option<AuditReport>,
}

/// A sparse patch returned by a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialUpdate {
    pub evidences: Vec<Evidence>,
    pub opinions: Vec<Opinion>,
    pub logs: Vec<String>,
    pub routing: BTreeMap<String, String>,
    pub fatal: Option<String>,
    pub verdicts: Vec<CriterionVerdict>,
    pub report: Option<AuditReport>,
}

impl PartialUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evidence(mut self, evidence: Evidence) -> Self {
        self.evidences.push(evidence);
        self
    }

    pub fn evidences(mut self, evidences: impl IntoIterator<Item = Evidence>) -> Self {
        self.evidences.extend(evidences);
        self
    }

    pub fn opinion(mut self, opinion: Opinion) -> Self {
        self.opinions.push(opinion);
        self
    }

    pub fn log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn route(mut self, key: impl Into<String>, label: impl Into<String>) -> Self {
        self.routing.insert(key.into(), label.into());
        self
    }

    pub fn fatal(mut self, reason: impl Into<String>) -> Self {
        if self.fatal.is_none() {
            self.fatal = Some(reason.into());
        }
        self
    }

    pub fn verdict(mut self, verdict: CriterionVerdict) -> Self {
        self.verdicts.push(verdict);
        self
    }

    pub fn report(mut self, report: AuditReport) -> Self {
        self.report = Some(report);
        self
    }

    /// Fold another patch into this one, preserving per-key semantics.
    pub fn extend(&mut self, other: PartialUpdate) {
        self.evidences.extend(other.evidences);
        self.opinions.extend(other.opinions);
        self.logs.extend(other.logs);
        self.routing.extend(other.routing);
        if self.fatal.is_none() {
            self.fatal = other.fatal;
        }
        self.verdicts.extend(other.verdicts);
        if self.report.is_none() {
            self.report = other.report;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PartialUpdate::default()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// Apply a patch in place.
    ///
    /// Once the state is fatal, later evidence and opinions are discarded
    /// with a log line. Invalid evidence and out-of-range opinions are
    /// rejected the same way.
    pub fn apply(&mut self, update: PartialUpdate) {
        let PartialUpdate {
            evidences,
            opinions,
            logs,
            routing,
            fatal,
            verdicts,
            report,
        } = update;

        self.logs.extend(logs);

        for evidence in evidences {
            if let Some(reason) = &self.fatal {
                self.logs.push(format!(
                    "state: discarded evidence {} after fatal ({reason})",
                    evidence.id
                ));
                continue;
            }
            if let Err(e) = evidence.validate() {
                self.logs.push(format!("state: rejected evidence: {e}"));
                continue;
            }
            if self.evidences.contains_key(&evidence.id) {
                self.logs.push(format!(
                    "state: evidence id collision on {}, last writer wins",
                    evidence.id
                ));
            }
            self.evidences.insert(evidence.id.clone(), evidence);
        }

        for opinion in opinions {
            if self.fatal.is_some() {
                self.logs.push(format!(
                    "state: discarded {} opinion for {} after fatal",
                    opinion.persona, opinion.criterion_id
                ));
                continue;
            }
            if !(1..=5).contains(&opinion.score) {
                self.logs.push(format!(
                    "state: rejected {} opinion for {}: score {} outside 1..=5",
                    opinion.persona, opinion.criterion_id, opinion.score
                ));
                continue;
            }
            self.opinions.push(opinion);
        }

        self.routing.extend(routing);

        if let Some(reason) = fatal {
            if self.fatal.is_none() {
                self.fatal = Some(reason);
            }
        }

        self.verdicts.extend(verdicts);

        if let Some(report) = report {
            if self.report.is_some() {
                self.logs
                    .push("state: report already assembled, ignoring second report".to_string());
            } else {
                self.report = Some(report);
            }
        }
    }

    /// Functional form of [`RunState::apply`].
    pub fn merge(mut self, update: PartialUpdate) -> RunState {
        self.apply(update);
        self
    }

    /// Opinions for one criterion, grouped by persona.
    ///
    /// When a persona has more than one opinion the first one wins.
    pub fn opinions_for(&self, criterion_id: &str) -> BTreeMap<Persona, &Opinion> {
        let mut by_persona = BTreeMap::new();
        for opinion in self.opinions.iter().filter(|o| o.criterion_id == criterion_id) {
            by_persona.entry(opinion.persona).or_insert(opinion);
        }
        by_persona
    }

    pub fn verdict(&self, criterion_id: &str) -> Option<&CriterionVerdict> {
        self.verdicts.iter().find(|v| v.criterion_id == criterion_id)
    }
}
