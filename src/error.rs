//! Error taxonomy for the coding pipeline.
//!
//! Run-level problems ([`CoderError::Configuration`]) abort a run before any
//! file is touched. Everything else is attributable to one input file and is
//! recorded in that file's report while the batch continues. An empty
//! retrieval is not an error; see [`crate::models::Payload::NoRelevantContent`].

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoderError>;

/// External capability that failed during a file's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Embedding,
    Completion,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Embedding => write!(f, "embedding"),
            Service::Completion => write!(f, "completion"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoderError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported file format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("failed to extract text from {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("{service} service error: {message}")]
    Upstream { service: Service, message: String },

    #[error("concept not found: {0}")]
    ConceptNotFound(String),

    #[error("concept already exists: {0}")]
    DuplicateConcept(String),

    #[error("output error: {0}")]
    Output(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoderError {
    pub fn config(message: impl Into<String>) -> Self {
        CoderError::Configuration(message.into())
    }

    pub fn upstream(service: Service, message: impl Into<String>) -> Self {
        CoderError::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Stable short label recorded in run summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            CoderError::Configuration(_) => "configuration",
            CoderError::UnsupportedFormat(_) => "unsupported_format",
            CoderError::Extraction { .. } => "extraction",
            CoderError::Upstream { .. } => "upstream",
            CoderError::ConceptNotFound(_) => "concept_not_found",
            CoderError::DuplicateConcept(_) => "duplicate_concept",
            CoderError::Output(_) | CoderError::Io(_) => "output",
        }
    }

    /// Whether this error must abort the whole run rather than one file.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, CoderError::Configuration(_))
    }
}

impl From<csv::Error> for CoderError {
    fn from(value: csv::Error) -> Self {
        CoderError::Output(value.to_string())
    }
}

impl From<serde_json::Error> for CoderError {
    fn from(value: serde_json::Error) -> Self {
        CoderError::Output(value.to_string())
    }
}
