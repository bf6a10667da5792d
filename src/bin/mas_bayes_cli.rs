//! Risk model command line interface
//!
//! A CLI for validating typology model packs and running one-shot
//! assessments against them.
//!
//! # Usage
//!
//! ```bash
//! # Validate a models directory (structure, CPT shapes, polytree check)
//! mas_bayes_cli validate --models-dir models
//!
//! # Assess evidence against a typology
//! mas_bayes_cli assess --typology insider_dealing --evidence evidence.yaml
//!
//! # Evidence file shape (states by label or by index):
//! #   q1_trade_pattern: { state: yes, confidence: 0.9 }
//! #   q2_pnl_anomaly: { state: no }
//! #   q3_timing_proximity: { state: 2 }
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use mas_bayes::{EvidenceSet, ModelRegistry, RiskEngine};

#[derive(Parser)]
#[command(name = "mas_bayes_cli")]
#[command(version = "0.1.0")]
#[command(about = "Validate typology models and run risk assessments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory containing typology model YAML files
    #[arg(long, global = true, env = "MAS_BAYES_MODELS_DIR", default_value = "models")]
    models_dir: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and compile every model, reporting structure per typology
    Validate,

    /// Run a single assessment and print the result
    Assess {
        /// Typology to assess against
        #[arg(short, long)]
        typology: String,

        /// Evidence YAML file (reads an empty set if not provided)
        #[arg(short, long)]
        evidence: Option<PathBuf>,

        /// Output format
        #[arg(long, short = 'o', default_value = "pretty", value_enum)]
        format: OutputFormat,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate => cmd_validate(&cli.models_dir),
        Commands::Assess {
            typology,
            evidence,
            format,
        } => cmd_assess(&cli.models_dir, &typology, evidence.as_deref(), format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(models_dir: &std::path::Path) -> Result<()> {
    let registry = ModelRegistry::load_from_dir(models_dir)
        .with_context(|| format!("validating models in {models_dir:?}"))?;

    if registry.is_empty() {
        println!("no models found in {models_dir:?}");
        return Ok(());
    }

    println!("{} typology model(s) compiled cleanly:\n", registry.len());
    for typology in registry.typologies() {
        let network = registry
            .require(&typology)
            .context("registry listed a typology it cannot serve")?;
        println!(
            "  {:<24} {:>3} nodes  {:>3} edges  {:>2} evidence  outcome '{}'",
            typology,
            network.len(),
            network.n_edges(),
            network.evidence_nodes().len(),
            network.node(network.outcome()).def.id,
        );
    }
    Ok(())
}

fn cmd_assess(
    models_dir: &std::path::Path,
    typology: &str,
    evidence_path: Option<&std::path::Path>,
    format: OutputFormat,
) -> Result<()> {
    let registry = ModelRegistry::load_from_dir(models_dir)
        .with_context(|| format!("loading models from {models_dir:?}"))?;
    let engine = RiskEngine::new(Arc::new(registry));

    let evidence = match evidence_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading evidence file {path:?}"))?;
            serde_yaml::from_str::<EvidenceSet>(&content)
                .with_context(|| format!("parsing evidence file {path:?}"))?
        }
        None => EvidenceSet::new(),
    };

    let assessment = engine.assess(typology, &evidence)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        OutputFormat::Pretty => {
            println!("assessment   {}", assessment.assessment_id);
            println!("typology     {}", assessment.typology);
            println!("evaluated    {}", assessment.evaluated_at);
            println!(
                "risk         {:.4}  (adjusted {:.4})",
                assessment.risk_score, assessment.adjusted_risk_score
            );
            println!(
                "esi          {:.4}  [{}]",
                assessment.esi.score, assessment.esi.badge
            );
            println!("posterior");
            for (state, p) in assessment
                .posterior
                .states
                .iter()
                .zip(&assessment.posterior.probabilities)
            {
                println!("  {state:<12} {p:.4}");
            }
            if !assessment.fallbacks.is_empty() {
                println!(
                    "fallbacks    {} of {} evidence nodes ({:.0}%)",
                    assessment.fallbacks.len(),
                    assessment.fallbacks.len() + evidence.len(),
                    assessment.fallback_ratio * 100.0
                );
                for record in &assessment.fallbacks {
                    println!("  {:<28} {}", record.node, record.kind.as_str());
                }
            }
        }
    }
    Ok(())
}
