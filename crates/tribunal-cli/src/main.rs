//! Tribunal - multi-persona repository audits
//!
//! The `tribunal` command runs an audit and writes the report.
//!
//! ## Commands
//!
//! - `audit`: audit a repository (local path or git URL)
//! - `rubric`: validate and list a rubric
//! - `graph`: print the audit graph as Mermaid

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use tribunal_core::{
    opinion_producer, AuditConfig, AuditEngine, AuditOutcome, AuditTarget, ProviderConfig, Rubric,
};

#[derive(Parser)]
#[command(name = "tribunal")]
#[command(version = tribunal_core::VERSION)]
#[command(about = "Deterministic multi-persona repository audits", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Audit a repository and write Markdown and JSON reports
    Audit {
        /// Local repository path or git URL
        repo: String,

        /// Architecture report (Markdown or plain text)
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Rubric JSON (default: built-in rubric)
        #[arg(long)]
        rubric: Option<PathBuf>,

        /// Audit config JSON (default: built-in defaults)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output directory for audit_report.md and audit_report.json
        #[arg(short, long, default_value = "audit")]
        out_dir: PathBuf,

        #[command(flatten)]
        provider: ProviderArgs,
    },

    /// Validate a rubric and list its criteria
    Rubric {
        /// Rubric JSON (default: built-in rubric)
        path: Option<PathBuf>,
    },

    /// Print the audit graph as a Mermaid diagram
    Graph {
        /// Rubric JSON (default: built-in rubric)
        #[arg(long)]
        rubric: Option<PathBuf>,
    },
}

/// Opinion provider selection. Without an endpoint the offline heuristic
/// producer is used.
#[derive(clap::Args, Debug, Clone)]
struct ProviderArgs {
    /// OpenAI-compatible chat completions endpoint
    #[arg(long, env = "TRIBUNAL_PROVIDER_URL")]
    provider_url: Option<String>,

    /// Model name sent to the endpoint
    #[arg(long, env = "TRIBUNAL_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// Bearer token for the endpoint
    #[arg(long, env = "TRIBUNAL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl ProviderArgs {
    fn provider_config(&self) -> ProviderConfig {
        match &self.provider_url {
            Some(endpoint) => ProviderConfig::Http {
                endpoint: endpoint.clone(),
                model: self.model.clone(),
                api_key: self.api_key.clone(),
            },
            None => ProviderConfig::Heuristic,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tribunal_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Audit {
            repo,
            report,
            rubric,
            config,
            out_dir,
            provider,
        } => {
            let mut target = AuditTarget::new(repo);
            if let Some(report) = report {
                target = target.with_report(report);
            }
            let outcome = cmd_audit(
                target,
                rubric.as_deref(),
                config.as_deref(),
                &out_dir,
                &provider.provider_config(),
            )
            .await?;
            print_summary(&outcome, &out_dir);
            Ok(())
        }
        Commands::Rubric { path } => cmd_rubric(path.as_deref()),
        Commands::Graph { rubric } => cmd_graph(rubric.as_deref()),
    }
}

fn load_rubric(path: Option<&Path>) -> Result<Rubric> {
    match path {
        Some(path) => {
            Rubric::load(path).with_context(|| format!("Failed to load rubric {}", path.display()))
        }
        None => Ok(Rubric::default_rubric()),
    }
}

fn load_config(path: Option<&Path>) -> Result<AuditConfig> {
    match path {
        Some(path) => AuditConfig::load(path)
            .with_context(|| format!("Failed to load audit config {}", path.display())),
        None => Ok(AuditConfig::default()),
    }
}

/// Run one audit and write `audit_report.md` and `audit_report.json` into
/// `out_dir`.
///
/// Degraded reports are still a success; only construction failures error.
async fn cmd_audit(
    target: AuditTarget,
    rubric_path: Option<&Path>,
    config_path: Option<&Path>,
    out_dir: &Path,
    provider: &ProviderConfig,
) -> Result<AuditOutcome> {
    let rubric = load_rubric(rubric_path)?;
    let config = load_config(config_path)?;
    let producer = opinion_producer(provider).context("Failed to configure opinion provider")?;
    let engine = AuditEngine::new(rubric, config, producer).context("Failed to construct audit")?;

    info!("Auditing {}", target.repo);
    let outcome = engine.run(target).await.context("Failed to construct audit graph")?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    let md_path = out_dir.join("audit_report.md");
    std::fs::write(&md_path, render::render_markdown(&outcome.report, engine.rubric()))
        .with_context(|| format!("Failed to write {}", md_path.display()))?;
    let json_path = out_dir.join("audit_report.json");
    let json = serde_json::to_string_pretty(&outcome.report).context("Failed to serialize report")?;
    std::fs::write(&json_path, json).with_context(|| format!("Failed to write {}", json_path.display()))?;

    Ok(outcome)
}

fn print_summary(outcome: &AuditOutcome, out_dir: &Path) {
    let report = &outcome.report;
    println!("Run {}", report.run_id);
    for verdict in &report.criteria {
        let marker = if verdict.degraded { " (degraded)" } else { "" };
        println!("  {:<24} {}{marker}", verdict.criterion_id, verdict.final_score);
    }
    println!("Overall score: {:.2}", report.overall_score);
    println!("Reports written to {}", out_dir.display());
}

fn cmd_rubric(path: Option<&Path>) -> Result<()> {
    let rubric = load_rubric(path)?;
    println!("{} criteria", rubric.criteria.len());
    for criterion in &rubric.criteria {
        let tags: Vec<&str> = criterion.tags.iter().map(String::as_str).collect();
        println!(
            "  {} - {} [{}]",
            criterion.id,
            criterion.display_name(),
            tags.join(", ")
        );
        if !criterion.evidence_ids.is_empty() {
            println!("    evidence: {}", criterion.evidence_ids.join(", "));
        }
    }
    Ok(())
}

fn cmd_graph(rubric_path: Option<&Path>) -> Result<()> {
    let rubric = load_rubric(rubric_path)?;
    let producer = opinion_producer(&ProviderConfig::Heuristic)?;
    let engine = AuditEngine::new(rubric, AuditConfig::default(), producer)
        .context("Failed to construct audit")?;
    let graph = engine.graph().context("Failed to compile audit graph")?;
    print!("{}", graph.to_mermaid());
    Ok(())
}
