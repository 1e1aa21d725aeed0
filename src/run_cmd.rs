//! `coder run`: code or retrieve evidence for one concept across a batch.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::completion::create_completion_model;
use crate::concepts::ConceptStore;
use crate::config::{load_config, save_config, Config, ResultFormat};
use crate::embedding::create_embedder;
use crate::inputs::expand_inputs;
use crate::models::{AnalysisMode, RunReport};
use crate::pipeline::{CodingPipeline, RunSettings};
use crate::progress::ProgressMode;
use crate::routing::{BpeCounter, RoutingPolicy, TokenizerKind};
use crate::writer::{create_writer, write_summary, OutputNames};

/// Command-line choices for one run. `None` keeps the configured value.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub concept: String,
    pub mode: AnalysisMode,
    pub threshold: Option<f32>,
    pub max_chunks: Option<usize>,
    pub format: Option<ResultFormat>,
    pub output: Option<PathBuf>,
    pub system_message: Option<String>,
    pub user_message: Option<String>,
    pub output_format: Option<String>,
    pub explanations: bool,
    /// Write the prompt and threshold used back to the config file.
    pub save: bool,
    pub progress: ProgressMode,
    pub inputs: Vec<PathBuf>,
}

impl RunOptions {
    /// Return a copy of `config` with these options applied.
    pub fn apply(&self, config: &Config) -> Config {
        let mut config = config.clone();
        if let Some(threshold) = self.threshold {
            config.retrieval.threshold = threshold;
        }
        if let Some(max_chunks) = self.max_chunks {
            config.retrieval.max_chunks = max_chunks;
        }
        if let Some(format) = self.format {
            config.retrieval.result_format = format;
        }
        if let Some(dir) = &self.output {
            config.output.dir = dir.clone();
        }
        if let Some(s) = &self.system_message {
            config.prompt.system_message = s.clone();
        }
        if let Some(s) = &self.user_message {
            config.prompt.user_message = s.clone();
        }
        if let Some(s) = &self.output_format {
            config.prompt.output_format = s.clone();
        }
        if self.explanations {
            config.prompt.explanations = true;
        }
        config
    }
}

/// Run the pipeline over the inputs and write results plus the run summary.
///
/// Everything that can be checked up front (settings, concept, inputs,
/// credentials) is checked before any output file is created.
pub async fn run_coding(
    config: &Config,
    config_path: &Path,
    opts: &RunOptions,
    cancel: Arc<AtomicBool>,
) -> Result<RunReport> {
    let effective = opts.apply(config);
    effective.validate()?;

    let store = ConceptStore::load(&effective.concepts.path)?;
    let concept = store
        .get(&opts.concept)
        .with_context(|| format!("concept store: {}", store.path().display()))?
        .clone();

    let files = expand_inputs(&opts.inputs)?;
    if files.is_empty() {
        bail!("No input files found");
    }

    let embedder =
        create_embedder(&effective.embedding).context("Failed to set up embedding provider")?;
    let completion = match opts.mode {
        AnalysisMode::Coding => Some(
            create_completion_model(&effective.completion)
                .context("Failed to set up completion provider")?,
        ),
        AnalysisMode::Retrieval => None,
    };
    let tokenizer = TokenizerKind::resolve(
        effective.routing.tokenizer.as_deref(),
        &effective.completion.model,
    )?;
    let router = RoutingPolicy::new(
        effective.routing.token_budget,
        Box::new(BpeCounter::new(tokenizer)?),
    );

    let pipeline = CodingPipeline::new(
        RunSettings::from_config(&effective),
        embedder,
        completion,
        router,
    )
    .with_cancel_flag(cancel);

    let started = chrono::Local::now();
    let names = OutputNames::new(&effective.output.dir, &concept, started);
    names.check_unused(effective.retrieval.result_format, opts.mode)?;
    let mut writer = create_writer(
        effective.retrieval.result_format,
        opts.mode,
        names.clone(),
        &concept.name,
    );
    let progress = opts.progress.reporter();

    let report = pipeline
        .run(
            &files,
            &concept,
            &effective.prompt,
            opts.mode,
            writer.as_mut(),
            progress.as_ref(),
        )
        .await?;
    let results_path = writer.finish()?;
    let summary_path = write_summary(&names, &report)?;

    if opts.save {
        // Only the prompt and threshold are persisted, not one-off overrides.
        let mut saved = load_config(config_path).unwrap_or_else(|_| config.clone());
        saved.prompt = effective.prompt.clone();
        saved.retrieval.threshold = effective.retrieval.threshold;
        save_config(&saved, config_path)?;
    }

    print_report(&report, results_path.as_deref(), &summary_path);
    if opts.save {
        println!("  saved prompt and threshold to {}", config_path.display());
    }
    Ok(report)
}

fn print_report(report: &RunReport, results: Option<&Path>, summary: &Path) {
    let mode = match report.mode {
        AnalysisMode::Coding => "coding",
        AnalysisMode::Retrieval => "retrieval",
    };
    println!("run {} ({})", report.concept, mode);
    println!("  files:               {}", report.files.len());
    println!("  succeeded:           {}", report.succeeded());
    println!("  no relevant content: {}", report.no_relevant_content());
    println!("  failed:              {}", report.failed());
    if report.skipped() > 0 {
        println!("  skipped:             {}", report.skipped());
    }
    match results {
        Some(path) => println!("  results:             {}", path.display()),
        None => println!("  results:             (none written)"),
    }
    println!("  summary:             {}", summary.display());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            concept: "Trust".to_string(),
            mode: AnalysisMode::Coding,
            threshold: None,
            max_chunks: None,
            format: None,
            output: None,
            system_message: None,
            user_message: None,
            output_format: None,
            explanations: false,
            save: false,
            progress: ProgressMode::Off,
            inputs: Vec::new(),
        }
    }

    #[test]
    fn unset_options_keep_config() {
        let config = Config::default();
        let applied = options().apply(&config);
        assert_eq!(applied.retrieval.max_chunks, config.retrieval.max_chunks);
        assert_eq!(applied.output.dir, config.output.dir);
        assert!(!applied.prompt.explanations);
    }

    #[test]
    fn options_override_config() {
        let mut opts = options();
        opts.threshold = Some(0.6);
        opts.format = Some(ResultFormat::Tabular);
        opts.system_message = Some("Be terse.".to_string());
        opts.explanations = true;

        let applied = opts.apply(&Config::default());
        assert!((applied.retrieval.threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(applied.retrieval.result_format, ResultFormat::Tabular);
        assert_eq!(applied.prompt.system_message, "Be terse.");
        assert!(applied.prompt.explanations);
    }

    #[test]
    fn invalid_override_is_caught() {
        let mut opts = options();
        opts.threshold = Some(1.5);
        assert!(opts.apply(&Config::default()).validate().is_err());
    }
}
