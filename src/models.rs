//! Core data models used throughout the coding pipeline.
//!
//! These types represent the concepts, documents, chunks, and per-file
//! results that flow from extraction through retrieval to the writers.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A named topic of interest. The description doubles as the retrieval
/// query and as context injected into completion prompts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Concept {
    pub name: String,
    pub description: String,
}

impl Concept {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Concept name made safe for use inside output file names.
    pub fn file_stem(&self) -> String {
        self.name
            .trim()
            .chars()
            .map(|c| match c {
                ' ' => '_',
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
                other => other,
            })
            .collect()
    }
}

/// The caller-supplied prompt parts, fixed for the duration of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSpec {
    #[serde(default)]
    pub system_message: String,
    #[serde(default)]
    pub user_message: String,
    #[serde(default)]
    pub output_format: String,
    #[serde(default)]
    pub explanations: bool,
}

impl PromptSpec {
    pub fn is_empty(&self) -> bool {
        self.system_message.trim().is_empty()
            && self.user_message.trim().is_empty()
            && self.output_format.trim().is_empty()
    }
}

/// Extracted text of one input file, owned by that file's pipeline run.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub text: String,
}

impl SourceDocument {
    pub fn file_name(&self) -> String {
        file_name(&self.path)
    }
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position in the chunk sequence, starting at 0.
    pub index: usize,
    /// File name the chunk was cut from.
    pub source: String,
    pub text: String,
    /// Byte offset of `text` in the source text.
    pub start: usize,
    /// Characters shared with the previous chunk (0 for the first).
    pub overlap: usize,
    /// Set when one unsplittable unit exceeded the size limit.
    pub oversized: bool,
}

/// A chunk with its relevance score for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// What the run does with each document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Fully-automated coding: the model judges the document.
    Coding,
    /// Relevant-context retrieval: passages are exported for human review.
    Retrieval,
}

/// Per-file execution strategy chosen by the routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    Direct,
    Retrieve,
}

impl std::fmt::Display for RoutePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutePath::Direct => write!(f, "direct"),
            RoutePath::Retrieve => write!(f, "retrieve"),
        }
    }
}

/// Result body for one file.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Model output for fully-automated coding.
    Completion(String),
    /// Non-empty evidence ordered by descending score.
    Evidence(Vec<ScoredChunk>),
    /// Nothing cleared the similarity threshold.
    NoRelevantContent,
}

/// One file's outcome for one run. Persisted as soon as it is produced.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub file_path: PathBuf,
    pub concept_name: String,
    pub timestamp: DateTime<Local>,
    pub route: RoutePath,
    pub payload: Payload,
}

impl AnalysisResult {
    pub fn file_name(&self) -> String {
        file_name(&self.file_path)
    }
}

/// Status line for one file in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Coded { route: RoutePath },
    Evidence { route: RoutePath, chunks: usize },
    NoRelevantContent { route: RoutePath },
    Failed { kind: String, message: String },
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Per-run summary: one entry per input file, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub concept: String,
    pub mode: AnalysisMode,
    pub started_at: DateTime<Local>,
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.files
            .iter()
            .filter(|f| {
                matches!(
                    f.status,
                    FileStatus::Coded { .. } | FileStatus::Evidence { .. }
                )
            })
            .count()
    }

    pub fn no_relevant_content(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::NoRelevantContent { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Failed { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::Skipped))
            .count()
    }
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
