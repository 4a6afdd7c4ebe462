//! `jurisnexus`: run analyses, consultations and feedback against a local engine.
//!
//! Every invocation opens the configured stores, does one thing, and exits.
//! Sessions, feedback and the learning log persist in the data directory, so
//! successive invocations build on each other.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use jurisnexus_core::{DocumentProfile, JurisConfig, TaskType};
use jurisnexus_engine::JurisEngine;
use jurisnexus_store::ExampleKind;
use tracing_subscriber::EnvFilter;

mod display;

#[derive(Parser)]
#[command(name = "jurisnexus", version, about = "Two-tier legal analysis engine")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "JURIS_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `storage.data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Simulate both tiers instead of calling models.
    #[arg(long, global = true)]
    mock: bool,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyse a document (`-` reads stdin).
    Analyze {
        path: PathBuf,
        /// contract_risk, consultation, drafting, litigation or research.
        #[arg(long, short, default_value = "contract_risk")]
        task: TaskType,
        /// Document language; detected from the text when omitted.
        #[arg(long)]
        language: Option<String>,
    },
    /// Ask a question, continuing a session when `--session` is given.
    Consult {
        message: String,
        #[arg(long)]
        session: Option<String>,
    },
    /// Close a consultation session.
    Close { session_id: String },
    /// Delete a consultation session and its history.
    Delete { session_id: String },
    /// List consultation sessions, newest first.
    Sessions,
    /// Show recent runs from the learning log.
    Logs {
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
        /// Only runs above (`success`) or below (`failure`) the quality threshold.
        #[arg(long)]
        kind: Option<Kind>,
    },
    /// Rate a finished analysis from 1 to 5.
    Feedback {
        task_id: String,
        rating: u8,
        #[arg(long)]
        comment: Option<String>,
        #[arg(long)]
        reviewer: Option<String>,
    },
    /// Run one template optimisation pass.
    Optimize,
    /// Learning-log and feedback statistics.
    Stats,
    /// List prompt templates.
    Templates {
        /// Include retired versions.
        #[arg(long)]
        all: bool,
        /// Only this lineage, oldest version first.
        #[arg(long)]
        lineage: Option<String>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Kind {
    Success,
    Failure,
}

impl From<Kind> for ExampleKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Success => ExampleKind::Success,
            Kind::Failure => ExampleKind::Failure,
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<JurisConfig> {
    let mut config = match &cli.config {
        Some(path) => JurisConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => JurisConfig::default(),
    };
    if cli.mock {
        config.tier1.mock = true;
        config.tier2.mock = true;
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = dir.clone();
    }
    Ok(config)
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("reading stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::info!("jurisnexus v{}", env!("CARGO_PKG_VERSION"));
    let engine = JurisEngine::open(config)
        .await
        .context("starting engine")?;

    match &cli.command {
        Command::Analyze {
            path,
            task,
            language,
        } => {
            let text = read_input(path)?;
            let mut profile = DocumentProfile::from_text(&text);
            if let Some(language) = language {
                profile.language = language.clone();
            }
            let result = engine.analyze(&text, *task, Some(profile)).await;
            if cli.json {
                display::print_json(&result)?;
            } else {
                display::print_result(&result);
            }
        }
        Command::Consult { message, session } => {
            let reply = engine
                .turn(session.as_deref(), message)
                .await
                .context("consultation turn")?;
            if cli.json {
                display::print_json(&reply)?;
            } else {
                println!("session {} turn {}", reply.session_id, reply.turn_index + 1);
                println!();
                display::print_result(&reply.result);
            }
        }
        Command::Close { session_id } => {
            engine
                .close_session(session_id)
                .await
                .with_context(|| format!("closing session {session_id}"))?;
            println!("closed {session_id}");
        }
        Command::Delete { session_id } => {
            engine
                .delete_session(session_id)
                .await
                .with_context(|| format!("deleting session {session_id}"))?;
            println!("deleted {session_id}");
        }
        Command::Sessions => {
            let sessions = engine.list_sessions().await.context("listing sessions")?;
            if cli.json {
                display::print_json(&sessions)?;
            } else {
                display::print_sessions(&sessions);
            }
        }
        Command::Logs { limit, kind } => {
            let runs = match kind {
                Some(kind) => engine.examples((*kind).into(), *limit).await,
                None => engine.recent_runs(*limit).await,
            }
            .context("reading the learning log")?;
            if cli.json {
                display::print_json(&runs)?;
            } else {
                display::print_runs(&runs);
            }
        }
        Command::Feedback {
            task_id,
            rating,
            comment,
            reviewer,
        } => {
            let record = engine
                .submit_feedback(task_id, *rating, comment.clone(), reviewer.clone())
                .await
                .with_context(|| format!("recording feedback for {task_id}"))?;
            if cli.json {
                display::print_json(&record)?;
            } else {
                println!("recorded {} ({}/5)", record.feedback_id, record.rating.value());
            }
        }
        Command::Optimize => {
            let report = engine.optimize().await.context("optimizer pass")?;
            if cli.json {
                display::print_json(&report)?;
            } else {
                display::print_pass(&report);
            }
        }
        Command::Stats => {
            let stats = engine.stats().await.context("collecting statistics")?;
            if cli.json {
                display::print_json(&stats)?;
            } else {
                display::print_stats(&stats);
            }
        }
        Command::Templates { all, lineage } => {
            let templates = match lineage {
                Some(lineage) => engine.templates().lineage(lineage)?,
                None => engine
                    .templates()
                    .all()?
                    .into_iter()
                    .filter(|t| *all || t.is_active())
                    .collect(),
            };
            if cli.json {
                display::print_json(&templates)?;
            } else {
                display::print_templates(&templates);
            }
        }
    }
    Ok(())
}
