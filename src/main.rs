//! # Concept Coder CLI (`coder`)
//!
//! The `coder` binary codes batches of documents against a named concept,
//! or retrieves the passages most relevant to it.
//!
//! ## Usage
//!
//! ```bash
//! coder --config ./config/coder.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `coder run` | Code or retrieve evidence for one concept across files and directories |
//! | `coder concepts list` | List the concepts in the codebook |
//! | `coder concepts show <name>` | Print one concept |
//! | `coder concepts add <name> <description>` | Add a concept |
//! | `coder concepts remove <name>` | Remove a concept |
//! | `coder inspect` | Show routes and chunk counts without calling any provider |
//!
//! ## Examples
//!
//! ```bash
//! # Define a concept
//! coder concepts add "Social support" "Help received from family, friends or community"
//!
//! # Code every interview against it
//! coder run --concept "Social support" ./interviews
//!
//! # Export the most relevant passages as CSV instead
//! coder run --concept "Social support" --mode retrieval --format tabular ./interviews
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use concept_coder::concepts_cmd;
use concept_coder::config::{self, Config, ResultFormat};
use concept_coder::inspect;
use concept_coder::models::AnalysisMode;
use concept_coder::progress::ProgressMode;
use concept_coder::run_cmd::{self, RunOptions};

/// Concept Coder: concept-grounded coding and retrieval over document batches.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/coder.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "coder",
    about = "Concept-grounded coding and relevant-context retrieval over document batches",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/coder.toml`. Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/coder.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Code documents against a concept, or retrieve relevant passages.
    ///
    /// Each file is extracted, measured in tokens and either sent whole to
    /// the completion model or narrowed to its most relevant chunks first.
    Run {
        /// Concept name, as listed by `coder concepts list`.
        #[arg(long)]
        concept: String,

        /// `coding` asks the model for a judgement, `retrieval` only exports
        /// the relevant passages.
        #[arg(long, value_enum, default_value = "coding")]
        mode: AnalysisMode,

        /// Minimum relevance score (0.0 to 1.0) for a chunk to be kept.
        #[arg(long)]
        threshold: Option<f32>,

        /// Maximum number of chunks retrieved per document.
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Result file format.
        #[arg(long, value_enum)]
        format: Option<ResultFormat>,

        /// Output directory for result files.
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long)]
        system_message: Option<String>,

        #[arg(long)]
        user_message: Option<String>,

        /// Instructions describing the expected answer format.
        #[arg(long)]
        output_format: Option<String>,

        /// Ask the model to justify each judgement.
        #[arg(long)]
        explanations: bool,

        /// Save the prompt and threshold used back to the config file.
        #[arg(long)]
        save: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Files and directories to process.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Manage the concept codebook.
    Concepts {
        #[command(subcommand)]
        action: ConceptAction,
    },

    /// Show how each input would be routed and chunked.
    ///
    /// Extracts every file and counts tokens locally. No embedding or
    /// completion provider is contacted.
    Inspect {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConceptAction {
    /// List all concepts.
    List,
    /// Print a concept's description.
    Show { name: String },
    /// Add a concept.
    Add {
        name: String,
        description: String,
        /// Replace the description if the concept already exists.
        #[arg(long)]
        replace: bool,
    },
    /// Remove a concept.
    Remove { name: String },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("CODER_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = load_or_default(&cli.config)?;

    match cli.command {
        Commands::Run {
            concept,
            mode,
            threshold,
            max_chunks,
            format,
            output,
            system_message,
            user_message,
            output_format,
            explanations,
            save,
            progress,
            inputs,
        } => {
            let opts = RunOptions {
                concept,
                mode,
                threshold,
                max_chunks,
                format,
                output,
                system_message,
                user_message,
                output_format,
                explanations,
                save,
                progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
                inputs,
            };

            let cancel = Arc::new(AtomicBool::new(false));
            let flag = cancel.clone();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if flag.swap(true, Ordering::SeqCst) {
                        warn!("second interrupt, exiting");
                        std::process::exit(130);
                    }
                    warn!("interrupt received, finishing the current file (Ctrl-C again to exit)");
                }
            });

            run_cmd::run_coding(&cfg, &cli.config, &opts, cancel).await?;
        }
        Commands::Concepts { action } => match action {
            ConceptAction::List => concepts_cmd::list_concepts(&cfg)?,
            ConceptAction::Show { name } => concepts_cmd::show_concept(&cfg, &name)?,
            ConceptAction::Add {
                name,
                description,
                replace,
            } => concepts_cmd::add_concept(&cfg, &name, &description, replace)?,
            ConceptAction::Remove { name } => concepts_cmd::remove_concept(&cfg, &name)?,
        },
        Commands::Inspect { inputs } => {
            inspect::run_inspect(&cfg, &inputs)?;
        }
    }

    Ok(())
}
