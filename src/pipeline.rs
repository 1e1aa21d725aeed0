//! Per-file orchestration of a coding or retrieval run.
//!
//! # Pipeline Flow
//!
//! ```text
//! file ──► extract ──► Coding:    route ─┬─ direct ──► complete(prompt + text)
//!                                        └─ retrieve ─► chunk ─► index ─► query(prompt)
//!                                                       ─► complete(prompt + chunks) | no relevant content
//!                      Retrieval: chunk ─► index ─► query(concept description)
//!                                 ─► evidence | no relevant content
//! ```
//!
//! Files are processed one at a time and independently. A failure in one
//! file is logged, recorded in the [`RunReport`] and the batch moves on.
//! Results are handed to the writer as soon as they exist.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_text, ChunkParams};
use crate::completion::CompletionModel;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{CoderError, Result};
use crate::extract::extract;
use crate::index::EvidenceIndex;
use crate::models::{
    file_name, AnalysisMode, AnalysisResult, Concept, FileReport, FileStatus, Payload, PromptSpec,
    RoutePath, RunReport, ScoredChunk, SourceDocument,
};
use crate::progress::{RunProgressEvent, RunProgressReporter};
use crate::prompt::{direct_request, render, retrieval_request};
use crate::routing::RoutingPolicy;
use crate::writer::ResultWriter;

/// Retrieval and chunking parameters, fixed for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub threshold: f32,
    pub max_chunks: usize,
    pub chunking: ChunkParams,
    pub embedding_batch_size: usize,
    pub repair_encoding: bool,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            threshold: config.retrieval.threshold,
            max_chunks: config.retrieval.max_chunks,
            chunking: config.chunking.params(),
            embedding_batch_size: config.embedding.batch_size,
            repair_encoding: config.extraction.repair_encoding,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(CoderError::config(format!(
                "threshold must be in [0.0, 1.0], got {}",
                self.threshold
            )));
        }
        if self.max_chunks == 0 {
            return Err(CoderError::config("max_chunks must be >= 1"));
        }
        self.chunking.validate()
    }
}

pub struct CodingPipeline {
    settings: RunSettings,
    embedder: Box<dyn Embedder>,
    completion: Option<Box<dyn CompletionModel>>,
    router: RoutingPolicy,
    cancel: Arc<AtomicBool>,
}

impl CodingPipeline {
    /// `completion` may be `None` for retrieval-only runs.
    pub fn new(
        settings: RunSettings,
        embedder: Box<dyn Embedder>,
        completion: Option<Box<dyn CompletionModel>>,
        router: RoutingPolicy,
    ) -> Self {
        Self {
            settings,
            embedder,
            completion,
            router,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a flag that stops the run before the next file when set.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Process `files` in order and return one report entry per file.
    ///
    /// Returns an error only for run-level problems, detected before any
    /// file is touched: an empty file list, coding without a completion
    /// model or without a prompt, and invalid settings.
    pub async fn run(
        &self,
        files: &[PathBuf],
        concept: &Concept,
        prompt: &PromptSpec,
        mode: AnalysisMode,
        writer: &mut dyn ResultWriter,
        progress: &dyn RunProgressReporter,
    ) -> Result<RunReport> {
        self.settings.validate()?;
        if files.is_empty() {
            return Err(CoderError::config("no input files"));
        }
        match mode {
            AnalysisMode::Coding => {
                if self.completion.is_none() {
                    return Err(CoderError::config(
                        "coding mode needs a completion model",
                    ));
                }
                if prompt.is_empty() {
                    return Err(CoderError::config(
                        "coding mode needs a prompt (system message, user message or output format)",
                    ));
                }
            }
            AnalysisMode::Retrieval => {}
        }

        let rendered = render(prompt, concept, mode);
        let total = files.len();
        let mut report = RunReport {
            concept: concept.name.clone(),
            mode,
            started_at: Local::now(),
            files: Vec::with_capacity(total),
        };
        info!(concept = %concept.name, ?mode, files = total, "starting run");

        for (i, path) in files.iter().enumerate() {
            if self.cancel.load(Ordering::SeqCst) {
                warn!(remaining = total - i, "run cancelled, skipping remaining files");
                report
                    .files
                    .extend(files[i..].iter().map(|p| FileReport {
                        file: p.clone(),
                        status: FileStatus::Skipped,
                    }));
                break;
            }

            let name = file_name(path);
            progress.report(RunProgressEvent::Started {
                file: name.clone(),
                n: i + 1,
                total,
            });

            let outcome = match self.analyze_file(path, concept, &rendered, mode).await {
                Ok(result) => writer.write(&result).map(|()| status_of(&result)),
                Err(e) => Err(e),
            };
            let status = match outcome {
                Ok(status) => status,
                Err(e) if e.is_fatal_to_run() => return Err(e),
                Err(e) => {
                    error!(file = %path.display(), kind = e.kind(), "{}", e);
                    FileStatus::Failed {
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    }
                }
            };

            progress.report(RunProgressEvent::Finished {
                file: name,
                n: i + 1,
                total,
                status: status.clone(),
            });
            report.files.push(FileReport {
                file: path.clone(),
                status,
            });
        }

        info!(
            succeeded = report.succeeded(),
            no_relevant_content = report.no_relevant_content(),
            failed = report.failed(),
            skipped = report.skipped(),
            "run finished"
        );
        Ok(report)
    }

    /// Run one file through extraction and analysis. `rendered` is the
    /// output of [`render`] for this run.
    pub async fn analyze_file(
        &self,
        path: &Path,
        concept: &Concept,
        rendered: &str,
        mode: AnalysisMode,
    ) -> Result<AnalysisResult> {
        let doc = extract(path, self.settings.repair_encoding)?;

        let (route, payload) = match mode {
            AnalysisMode::Coding => {
                let completion = self
                    .completion
                    .as_deref()
                    .ok_or_else(|| CoderError::config("coding mode needs a completion model"))?;
                let decision = self.router.choose_path(&doc.text);
                info!(
                    file = %path.display(),
                    tokens = decision.tokens,
                    budget = self.router.budget(),
                    route = %decision.path,
                    "coding"
                );
                let payload = match decision.path {
                    RoutePath::Direct => {
                        let request = direct_request(rendered, &doc.text);
                        Payload::Completion(completion.complete(&request).await?)
                    }
                    RoutePath::Retrieve => {
                        let evidence = self.retrieve(&doc, rendered).await?;
                        if evidence.is_empty() {
                            Payload::NoRelevantContent
                        } else {
                            let request = retrieval_request(rendered, &evidence);
                            Payload::Completion(completion.complete(&request).await?)
                        }
                    }
                };
                (decision.path, payload)
            }
            AnalysisMode::Retrieval => {
                let evidence = self.retrieve(&doc, &concept.description).await?;
                info!(
                    file = %path.display(),
                    relevant = evidence.len(),
                    "retrieved evidence"
                );
                let payload = if evidence.is_empty() {
                    Payload::NoRelevantContent
                } else {
                    Payload::Evidence(evidence)
                };
                (RoutePath::Retrieve, payload)
            }
        };

        Ok(AnalysisResult {
            file_path: path.to_path_buf(),
            concept_name: concept.name.clone(),
            timestamp: Local::now(),
            route,
            payload,
        })
    }

    /// Chunk, index and query one document. The index lives only for this call.
    async fn retrieve(&self, doc: &SourceDocument, query: &str) -> Result<Vec<ScoredChunk>> {
        let chunks = chunk_text(&doc.file_name(), &doc.text, &self.settings.chunking)?;
        debug!(file = %doc.path.display(), chunks = chunks.len(), "chunked");
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let index = EvidenceIndex::build(
            self.embedder.as_ref(),
            chunks,
            self.settings.embedding_batch_size,
        )
        .await?;
        index
            .query(
                self.embedder.as_ref(),
                query,
                self.settings.max_chunks,
                self.settings.threshold,
            )
            .await
    }
}

fn status_of(result: &AnalysisResult) -> FileStatus {
    match &result.payload {
        Payload::Completion(_) => FileStatus::Coded {
            route: result.route,
        },
        Payload::Evidence(evidence) => FileStatus::Evidence {
            route: result.route,
            chunks: evidence.len(),
        },
        Payload::NoRelevantContent => FileStatus::NoRelevantContent {
            route: result.route,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RunSettings {
        RunSettings {
            threshold: 0.5,
            max_chunks: 5,
            chunking: ChunkParams::new(200, 20),
            embedding_batch_size: 8,
            repair_encoding: true,
        }
    }

    #[test]
    fn settings_from_default_config_are_valid() {
        RunSettings::from_config(&Config::default()).validate().unwrap();
        settings().validate().unwrap();
    }

    #[test]
    fn chunk_settings_share_the_chunker_check() {
        let mut bad = settings();
        bad.chunking = ChunkParams::new(100, 100);
        let from_settings = bad.validate().unwrap_err().to_string();
        let from_chunker = bad.chunking.validate().unwrap_err().to_string();
        assert_eq!(from_settings, from_chunker);

        bad.chunking = ChunkParams::new(0, 0);
        assert!(bad
            .validate()
            .unwrap_err()
            .to_string()
            .contains("chunk size must be > 0"));
    }

    #[test]
    fn retrieval_settings_are_checked() {
        let mut bad = settings();
        bad.threshold = 1.5;
        assert!(matches!(bad.validate(), Err(CoderError::Configuration(_))));

        let mut bad = settings();
        bad.max_chunks = 0;
        assert!(matches!(bad.validate(), Err(CoderError::Configuration(_))));
    }
}
