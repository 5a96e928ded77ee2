//! The audit run: graph wiring and node bodies.
//!
//! ```text
//! intake ─┬─> <evidence producers> ─┴─> evidence_aggregator
//! evidence_aggregator --ready--> judicial_fanout
//!                     --missing_evidence | clone_failure--> report_assembler
//! judicial_fanout ─┬─> prosecutor | defense | tech_lead ─┴─> judicial_integrity
//! judicial_integrity --synthesize--> chief_justice --> report_assembler
//!                    --degraded--> report_assembler
//! ```
//!
//! The topology is fixed. A fresh graph is compiled for every run because
//! the nodes close over that run's target and id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregator::{self, EvidenceRoute};
use crate::collaborators::{
    DocAnalyst, EvidenceProducer, OpinionProducer, RemediationTextProvider, RepoInvestigator,
    TemplateRemediation,
};
use crate::config::AuditConfig;
use crate::dispatch::{criterion_routing_key, OpinionDispatcher};
use crate::domain::error::{AuditError, Result};
use crate::domain::evidence::AuditTarget;
use crate::domain::opinion::Persona;
use crate::domain::rubric::Rubric;
use crate::domain::verdict::{AuditReport, CriterionVerdict};
use crate::graph::{router, CompiledGraph, GraphBuilder, GraphError, Node, NodeRecord};
use crate::obs::{self, AuditSpan};
use crate::report::{ReportAssembler, INSUFFICIENT_INPUT};
use crate::state::{PartialUpdate, RunState};
use crate::synthesis::synthesize;

pub const INTAKE: &str = "intake";
pub const EVIDENCE_AGGREGATOR: &str = "evidence_aggregator";
pub const JUDICIAL_FANOUT: &str = "judicial_fanout";
pub const JUDICIAL_INTEGRITY: &str = "judicial_integrity";
pub const CHIEF_JUSTICE: &str = "chief_justice";
pub const REPORT_ASSEMBLER: &str = "report_assembler";

/// Routing key written by `judicial_integrity`.
pub const JUDICIAL_ROUTING_KEY: &str = "judicial";
const SYNTHESIZE: &str = "synthesize";
const DEGRADED: &str = "degraded";

/// Errors that prevent an audit run from being constructed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("invalid audit graph: {0}")]
    Graph(#[from] GraphError),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Everything the nodes of one run share.
struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    target: AuditTarget,
    rubric: Rubric,
    config: AuditConfig,
    dispatcher: Arc<OpinionDispatcher>,
    assembler: ReportAssembler,
}

/// Result of [`AuditEngine::run`].
#[derive(Debug, Clone)]
pub struct AuditOutcome {
    pub report: AuditReport,
    /// Final merged state, for inspection and replay of routing decisions.
    pub state: RunState,
    pub trace: Vec<NodeRecord>,
}

/// Runs audits of one rubric with a fixed set of collaborators.
pub struct AuditEngine {
    rubric: Rubric,
    config: AuditConfig,
    producers: Vec<Arc<dyn EvidenceProducer>>,
    dispatcher: Arc<OpinionDispatcher>,
    remediation: Arc<dyn RemediationTextProvider>,
}

impl AuditEngine {
    /// Validate `rubric` and `config` and wire the default evidence
    /// producers and template remediation.
    pub fn new(
        rubric: Rubric,
        config: AuditConfig,
        opinion_producer: Arc<dyn OpinionProducer>,
    ) -> EngineResult<Self> {
        rubric.validate()?;
        config.validate()?;
        let dispatcher = Arc::new(OpinionDispatcher::new(opinion_producer, &config));
        let remediation: Arc<dyn RemediationTextProvider> = Arc::new(TemplateRemediation::from_rubric(&rubric));
        let producers: Vec<Arc<dyn EvidenceProducer>> =
            vec![Arc::new(RepoInvestigator::default()), Arc::new(DocAnalyst)];
        let engine = Self {
            rubric,
            config,
            producers,
            dispatcher,
            remediation,
        };
        engine.graph()?;
        Ok(engine)
    }

    /// Replace the evidence producers. Each becomes one fan-out branch
    /// named after [`EvidenceProducer::name`].
    pub fn with_producers(mut self, producers: Vec<Arc<dyn EvidenceProducer>>) -> Self {
        self.producers = producers;
        self
    }

    pub fn with_remediation(mut self, remediation: Arc<dyn RemediationTextProvider>) -> Self {
        self.remediation = remediation;
        self
    }

    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// The compiled topology, for inspection. Nodes are bound to a
    /// placeholder target.
    pub fn graph(&self) -> EngineResult<CompiledGraph> {
        let ctx = self.context(Uuid::nil(), AuditTarget::new("."));
        Ok(self.compile(ctx)?)
    }

    /// Audit `target`.
    ///
    /// Only graph construction and digesting the fallback report can fail;
    /// every other runtime failure ends up in the report as degraded
    /// verdicts and log lines.
    pub async fn run(&self, target: AuditTarget) -> EngineResult<AuditOutcome> {
        let run_id = Uuid::new_v4();
        let ctx = self.context(run_id, target);
        let graph = self.compile(Arc::clone(&ctx))?;
        let run_label = run_id.to_string();

        AuditSpan::new(&run_label)
            .instrument(async {
                obs::emit_audit_started(&run_label, &ctx.target.repo, ctx.rubric.criteria.len());
                let started = Instant::now();
                let outcome = graph.execute(RunState::new()).await;

                let report = match &outcome.state.report {
                    Some(report) => AuditReport {
                        logs: outcome.state.logs.clone(),
                        ..report.clone()
                    },
                    None => {
                        // The terminal node itself failed.
                        let verdicts: Vec<CriterionVerdict> = ctx
                            .rubric
                            .criteria
                            .iter()
                            .map(|c| CriterionVerdict::degraded(&c.id, "report assembly failed"))
                            .collect();
                        ctx.assembler
                            .assemble(&ctx.rubric, &verdicts, &outcome.state, ctx.run_id, ctx.started_at)?
                    }
                };
                obs::emit_audit_finished(
                    &run_label,
                    started.elapsed().as_millis() as u64,
                    report.overall_score,
                    report.degraded,
                );
                Ok::<_, EngineError>(AuditOutcome {
                    report,
                    state: outcome.state,
                    trace: outcome.trace,
                })
            })
            .await
    }

    fn context(&self, run_id: Uuid, target: AuditTarget) -> Arc<RunContext> {
        Arc::new(RunContext {
            run_id,
            started_at: Utc::now(),
            target,
            rubric: self.rubric.clone(),
            config: self.config.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            assembler: ReportAssembler::new(self.config.satisfactory_score, Arc::clone(&self.remediation)),
        })
    }

    fn compile(&self, ctx: Arc<RunContext>) -> std::result::Result<CompiledGraph, GraphError> {
        let mut builder = GraphBuilder::new().node(INTAKE, IntakeNode { ctx: Arc::clone(&ctx) });

        for producer in &self.producers {
            let name = producer.name().to_string();
            builder = builder
                .node(
                    name.clone(),
                    EvidenceNode {
                        ctx: Arc::clone(&ctx),
                        producer: Arc::clone(producer),
                    },
                )
                .edge(INTAKE, name.clone())
                .edge(name, EVIDENCE_AGGREGATOR);
        }

        builder = builder
            .node(EVIDENCE_AGGREGATOR, AggregatorNode { ctx: Arc::clone(&ctx) })
            .conditional(
                EVIDENCE_AGGREGATOR,
                router(aggregator::route),
                &[
                    (EvidenceRoute::Ready.label(), JUDICIAL_FANOUT),
                    (EvidenceRoute::MissingEvidence.label(), REPORT_ASSEMBLER),
                    (EvidenceRoute::CloneFailure.label(), REPORT_ASSEMBLER),
                ],
            )
            .node(JUDICIAL_FANOUT, JudicialFanoutNode { ctx: Arc::clone(&ctx) });

        for persona in Persona::ALL {
            builder = builder
                .node(
                    persona.node_name(),
                    PersonaNode {
                        ctx: Arc::clone(&ctx),
                        persona,
                    },
                )
                .edge(JUDICIAL_FANOUT, persona.node_name())
                .edge(persona.node_name(), JUDICIAL_INTEGRITY);
        }

        builder
            .node(JUDICIAL_INTEGRITY, IntegrityNode { ctx: Arc::clone(&ctx) })
            .conditional(
                JUDICIAL_INTEGRITY,
                router(judicial_route),
                &[(SYNTHESIZE, CHIEF_JUSTICE), (DEGRADED, REPORT_ASSEMBLER)],
            )
            .node(CHIEF_JUSTICE, ChiefJusticeNode { ctx: Arc::clone(&ctx) })
            .edge(CHIEF_JUSTICE, REPORT_ASSEMBLER)
            .node(REPORT_ASSEMBLER, ReportNode { ctx })
            .compile()
    }
}

fn judicial_route(state: &RunState) -> String {
    match state.routing.get(JUDICIAL_ROUTING_KEY).map(String::as_str) {
        Some(SYNTHESIZE) => SYNTHESIZE,
        _ => DEGRADED,
    }
    .to_string()
}

struct IntakeNode {
    ctx: Arc<RunContext>,
}

#[async_trait]
impl Node for IntakeNode {
    async fn run(&self, _state: Arc<RunState>) -> Result<PartialUpdate> {
        let target = &self.ctx.target;
        let report = target
            .report
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none".to_string());
        Ok(PartialUpdate::new().log(format!(
            "{INTAKE}: run {} auditing {} (report: {report}) against {} criteria",
            self.ctx.run_id,
            target.repo,
            self.ctx.rubric.criteria.len()
        )))
    }
}

struct EvidenceNode {
    ctx: Arc<RunContext>,
    producer: Arc<dyn EvidenceProducer>,
}

#[async_trait]
impl Node for EvidenceNode {
    async fn run(&self, _state: Arc<RunState>) -> Result<PartialUpdate> {
        let name = self.producer.name();
        let limit = self.ctx.config.producer_timeout();
        let batch = match tokio::time::timeout(limit, self.producer.produce(&self.ctx.target)).await {
            Ok(batch) => batch?,
            Err(_) => {
                let err = AuditError::Timeout {
                    operation: format!("evidence producer {name}"),
                    limit_ms: duration_ms(limit),
                };
                return Ok(PartialUpdate::new().log(format!("{name}: {err}")).fatal(err.to_string()));
            }
        };

        if batch.is_fatal() {
            let reason = batch
                .detail
                .unwrap_or_else(|| "fatal resolution error".to_string());
            return Ok(PartialUpdate::new()
                .log(format!("{name}: fatal resolution error: {reason}"))
                .fatal(reason));
        }

        let mut line = format!("{name}: {} evidence item(s)", batch.evidences.len());
        if let Some(detail) = &batch.detail {
            line.push_str(&format!(" ({detail})"));
        }
        Ok(PartialUpdate::new().evidences(batch.evidences).log(line))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

struct AggregatorNode {
    ctx: Arc<RunContext>,
}

#[async_trait]
impl Node for AggregatorNode {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        let expected = aggregator::expected_ids(&self.ctx.rubric, &self.ctx.target);
        Ok(aggregator::aggregate(&state, &expected, &self.ctx.config))
    }
}

struct JudicialFanoutNode {
    ctx: Arc<RunContext>,
}

#[async_trait]
impl Node for JudicialFanoutNode {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        Ok(PartialUpdate::new().log(format!(
            "{JUDICIAL_FANOUT}: {} criteria x {} personas over {} evidence item(s)",
            self.ctx.rubric.criteria.len(),
            Persona::ALL.len(),
            state.evidences.len()
        )))
    }
}

struct PersonaNode {
    ctx: Arc<RunContext>,
    persona: Persona,
}

#[async_trait]
impl Node for PersonaNode {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        Ok(self
            .ctx
            .dispatcher
            .dispatch_persona(&self.ctx.rubric.criteria, self.persona, state)
            .await)
    }
}

struct IntegrityNode {
    ctx: Arc<RunContext>,
}

#[async_trait]
impl Node for IntegrityNode {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        let mut update = PartialUpdate::new();
        let mut complete = 0usize;
        for criterion in &self.ctx.rubric.criteria {
            let present = state.opinions_for(&criterion.id);
            if present.len() == Persona::ALL.len() {
                complete += 1;
                continue;
            }
            let missing: Vec<String> = Persona::ALL
                .iter()
                .filter(|p| !present.contains_key(*p))
                .map(|p| p.to_string())
                .collect();
            let key = criterion_routing_key(&criterion.id);
            if !state.routing.contains_key(&key) {
                update = update.route(key, DEGRADED);
            }
            update = update.log(format!(
                "{JUDICIAL_INTEGRITY}: {} lacks {} opinion(s); routed to degraded verdict",
                criterion.id,
                missing.join(", ")
            ));
        }

        let label = if complete > 0 { SYNTHESIZE } else { DEGRADED };
        Ok(update.route(JUDICIAL_ROUTING_KEY, label).log(format!(
            "{JUDICIAL_INTEGRITY}: {complete}/{} criteria have three opinions",
            self.ctx.rubric.criteria.len()
        )))
    }
}

struct ChiefJusticeNode {
    ctx: Arc<RunContext>,
}

#[async_trait]
impl Node for ChiefJusticeNode {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        let mut update = PartialUpdate::new();
        for criterion in &self.ctx.rubric.criteria {
            if let Some(label) = state.routing.get(&criterion_routing_key(&criterion.id)) {
                update = update.verdict(CriterionVerdict::degraded(
                    &criterion.id,
                    format!("not synthesized: {label}"),
                ));
                continue;
            }
            match synthesize(criterion, &state.opinions, &state.evidences, &self.ctx.config.synthesis) {
                Ok(verdict) => {
                    obs::emit_verdict_synthesized(&criterion.id, verdict.final_score, verdict.rule_trace.len());
                    let rules: Vec<&str> = verdict.rule_trace.iter().map(|r| r.as_str()).collect();
                    update = update
                        .log(format!(
                            "{CHIEF_JUSTICE}: {} -> {} [{}]",
                            criterion.id,
                            verdict.final_score,
                            rules.join(", ")
                        ))
                        .verdict(verdict);
                }
                Err(e) => {
                    if e.is_fatal() {
                        update = update.fatal(format!("{CHIEF_JUSTICE}: {e}"));
                    }
                    update = update
                        .log(format!("{CHIEF_JUSTICE}: {}: {e}", criterion.id))
                        .verdict(CriterionVerdict::degraded(&criterion.id, e.to_string()));
                }
            }
        }
        Ok(update)
    }
}

struct ReportNode {
    ctx: Arc<RunContext>,
}

#[async_trait]
impl Node for ReportNode {
    async fn run(&self, state: Arc<RunState>) -> Result<PartialUpdate> {
        let ctx = &self.ctx;
        let reached_dispatch = state
            .routing
            .get(aggregator::ROUTING_KEY)
            .is_some_and(|l| l == EvidenceRoute::Ready.label());

        let mut update = PartialUpdate::new();
        let verdicts: Vec<CriterionVerdict> = if reached_dispatch {
            state.verdicts.clone()
        } else {
            let insufficient: Vec<CriterionVerdict> = ctx
                .rubric
                .criteria
                .iter()
                .map(|c| CriterionVerdict::degraded(&c.id, INSUFFICIENT_INPUT))
                .collect();
            update.verdicts = insufficient.clone();
            insufficient
        };

        let report = ctx
            .assembler
            .assemble(&ctx.rubric, &verdicts, &state, ctx.run_id, ctx.started_at)?;
        let degraded = report.criteria.iter().filter(|v| v.degraded).count();
        let line = format!(
            "{REPORT_ASSEMBLER}: overall {:.2} over {} criteria ({degraded} degraded)",
            report.overall_score,
            report.criteria.len(),
        );
        Ok(update.log(line).report(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HeuristicOpinionProducer;
    use crate::domain::opinion::Opinion;
    use crate::domain::rubric::Criterion;

    #[test]
    fn test_topology_compiles() {
        let engine = AuditEngine::new(
            Rubric::default_rubric(),
            AuditConfig::default(),
            Arc::new(HeuristicOpinionProducer),
        )
        .unwrap();
        let graph = engine.graph().unwrap();
        assert_eq!(graph.entry_name(), INTAKE);
        assert_eq!(graph.terminal_name(), REPORT_ASSEMBLER);
        assert_eq!(
            graph.predecessors_of(JUDICIAL_INTEGRITY).unwrap(),
            vec!["prosecutor", "defense", "tech_lead"]
        );
        assert_eq!(
            graph.predecessors_of(REPORT_ASSEMBLER).unwrap(),
            vec![EVIDENCE_AGGREGATOR, JUDICIAL_INTEGRITY, CHIEF_JUSTICE]
        );
    }

    #[test]
    fn test_duplicate_producer_names_rejected() {
        let producers: Vec<Arc<dyn EvidenceProducer>> = vec![Arc::new(DocAnalyst), Arc::new(DocAnalyst)];
        let engine = AuditEngine::new(
            Rubric::default_rubric(),
            AuditConfig::default(),
            Arc::new(HeuristicOpinionProducer),
        )
        .unwrap()
        .with_producers(producers);
        assert!(matches!(
            engine.graph(),
            Err(EngineError::Graph(GraphError::DuplicateNode(_)))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AuditConfig {
            max_opinion_retries: 2,
            ..AuditConfig::default()
        };
        let result = AuditEngine::new(Rubric::default_rubric(), config, Arc::new(HeuristicOpinionProducer));
        assert!(matches!(result, Err(EngineError::Audit(AuditError::InvalidConfig(_)))));
    }

    fn opinion(criterion_id: &str, persona: Persona, score: u8) -> Opinion {
        Opinion {
            criterion_id: criterion_id.to_string(),
            persona,
            score,
            rationale: format!("{persona} on {criterion_id}"),
            cited_evidence: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_opinion_makes_chief_justice_fatal() {
        let rubric = Rubric::new(vec![Criterion::new("C1", "State"), Criterion::new("C2", "Graph")]).unwrap();
        let engine = AuditEngine::new(rubric, AuditConfig::default(), Arc::new(HeuristicOpinionProducer)).unwrap();
        let node = ChiefJusticeNode {
            ctx: engine.context(Uuid::nil(), AuditTarget::new(".")),
        };
        let mut state = RunState::new();
        state.opinions = vec![
            opinion("C1", Persona::Prosecutor, 3),
            opinion("C1", Persona::Defense, 4),
            opinion("C1", Persona::Defense, 5),
            opinion("C1", Persona::TechLead, 4),
            opinion("C2", Persona::Prosecutor, 4),
            opinion("C2", Persona::Defense, 4),
            opinion("C2", Persona::TechLead, 4),
        ];

        let update = node.run(Arc::new(state)).await.unwrap();

        let fatal = update.fatal.clone().unwrap();
        assert!(fatal.starts_with("chief_justice: rule table defect in base_aggregation"));
        assert!(fatal.contains("duplicate Defense opinion for C1"));
        let c1 = update.verdicts.iter().find(|v| v.criterion_id == "C1").unwrap();
        assert!(c1.degraded);
        assert_eq!(c1.final_score, 1);
        let c2 = update.verdicts.iter().find(|v| v.criterion_id == "C2").unwrap();
        assert!(!c2.degraded);
        assert_eq!(c2.final_score, 4);
    }
}
