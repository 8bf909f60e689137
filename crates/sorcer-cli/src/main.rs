//! SORCER model runner
//!
//! The `sorcer` command evaluates JSON model files against the built-in
//! arithmetic providers.
//!
//! ## Commands
//!
//! - `eval`: Evaluate response paths, optionally after reselecting fidelities
//! - `plan`: Show the order in which paths would be evaluated
//! - `fidelities`: List fidelity slots and their candidates
//! - `deploy-id`: Compute the deployment id for `provider:type` pairs
//! - `config`: Show the session configuration resolved from the environment

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};

use sorcer_cli::{parse_assignment, providers, ModelFile};
use sorcer_core::telemetry::{init_tracing, LogFormat};
use sorcer_core::{deployment_id, Named, Session, SessionConfig, Signature};

#[derive(Parser)]
#[command(name = "sorcer")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Evaluate SORCER models with fidelity selection", long_about = None)]
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
    /// Evaluate response paths of a model file
    Eval {
        /// Path to the model file (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Response path to evaluate (default: the model's responses)
        #[arg(short, long = "response")]
        responses: Vec<String>,

        /// Select a fidelity candidate before evaluating, as SLOT=CANDIDATE
        #[arg(long = "select", value_parser = parse_assignment)]
        selections: Vec<(String, String)>,

        /// Apply a meta-fidelity projection before evaluating, as META=PROJECTION
        #[arg(long = "morph", value_parser = parse_assignment)]
        morphs: Vec<(String, String)>,
    },

    /// Show the evaluation order of response paths
    Plan {
        /// Path to the model file (JSON)
        #[arg(short, long)]
        model: PathBuf,

        /// Response path to plan (default: the model's responses)
        #[arg(short, long = "response")]
        responses: Vec<String>,
    },

    /// List fidelity slots, their candidates and the current selection
    Fidelities {
        /// Path to the model file (JSON)
        #[arg(short, long)]
        model: PathBuf,
    },

    /// Compute the deployment id for a set of `provider:type` pairs
    DeployId {
        /// Pairs such as `Calculator-D:Calculator`
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Print the session configuration resolved from SORCER_* variables
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Eval {
            model,
            responses,
            selections,
            morphs,
        } => cmd_eval(&model, &responses, &selections, &morphs).await,
        Commands::Plan { model, responses } => cmd_plan(&model, &responses),
        Commands::Fidelities { model } => cmd_fidelities(&model),
        Commands::DeployId { pairs } => cmd_deploy_id(&pairs),
        Commands::Config => cmd_config(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_model(path: &Path) -> Result<(std::sync::Arc<sorcer_core::Model>, Vec<String>)> {
    let file = ModelFile::from_path(path)?;
    let model = file
        .into_model()
        .with_context(|| format!("Failed to build model from {}", path.display()))?;
    let responses = model.response_paths().to_vec();
    Ok((model, responses))
}

fn targets(requested: &[String], declared: Vec<String>) -> Result<Vec<String>> {
    let targets = if requested.is_empty() {
        declared
    } else {
        requested.to_vec()
    };
    if targets.is_empty() {
        bail!("No response paths: pass --response or declare \"responses\" in the model file");
    }
    Ok(targets)
}

#[derive(Serialize)]
struct EvalOutput {
    model: String,
    values: BTreeMap<String, Value>,
    failures: BTreeMap<String, String>,
}

async fn cmd_eval(
    path: &Path,
    requested: &[String],
    selections: &[(String, String)],
    morphs: &[(String, String)],
) -> Result<()> {
    let (model, declared) = load_model(path)?;
    let targets = targets(requested, declared)?;

    let config = SessionConfig::from_env().context("Invalid SORCER_* configuration")?;
    let session = Session::builder()
        .config(config)
        .registry(providers::registry())
        .build()
        .context("Failed to start session")?;

    model
        .initialize()
        .context("Model initialization hook failed")?;
    for (meta, projection) in morphs {
        model
            .fidelities()
            .morph(meta, projection)
            .with_context(|| format!("Cannot morph {meta} to {projection}"))?;
    }
    for (slot, candidate) in selections {
        model
            .fidelities()
            .select(slot, candidate)
            .with_context(|| format!("Cannot select {candidate} for {slot}"))?;
    }

    info!(model = %model.name(), paths = targets.len(), "Evaluating");
    let responses = session.responses(&model, &targets).await?;
    session.metrics().flush();

    let failed = responses.failures.len();
    print_json(&EvalOutput {
        model: model.name().to_string(),
        values: responses.values,
        failures: responses
            .failures
            .into_iter()
            .map(|(path, err)| (path, err.to_string()))
            .collect(),
    })?;

    if failed > 0 {
        bail!("{failed} response path(s) failed");
    }
    Ok(())
}

fn cmd_plan(path: &Path, requested: &[String]) -> Result<()> {
    let (model, declared) = load_model(path)?;
    let targets = targets(requested, declared)?;
    let order = model
        .evaluation_order(&targets)
        .context("Cannot order model paths")?;
    for (step, path) in order.iter().enumerate() {
        println!("{:>3}  {}", step + 1, path);
    }
    Ok(())
}

#[derive(Serialize)]
struct SlotOutput {
    slot: String,
    selected: String,
    candidates: Vec<String>,
}

fn cmd_fidelities(path: &Path) -> Result<()> {
    let (model, _) = load_model(path)?;
    let fidelities = model.fidelities();
    let mut slots = Vec::new();
    for slot in fidelities.slot_names() {
        let candidates = fidelities
            .candidates(&slot)?
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        slots.push(SlotOutput {
            selected: fidelities.selected_name(&slot)?,
            slot,
            candidates,
        });
    }
    print_json(&slots)
}

fn cmd_deploy_id(pairs: &[String]) -> Result<()> {
    let signatures = pairs
        .iter()
        .map(|pair| {
            let (provider, service_type) = pair
                .split_once(':')
                .with_context(|| format!("Expected PROVIDER:TYPE, got '{pair}'"))?;
            Ok(Signature::object("deploy", service_type).with_provider_name(provider))
        })
        .collect::<Result<Vec<_>>>()?;
    println!("{}", deployment_id(&signatures));
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = SessionConfig::from_env().context("Invalid SORCER_* configuration")?;
    print_json(&config)
}
