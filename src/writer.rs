//! Persisting per-file results and the run summary.
//!
//! Every output file of a run shares one name pattern,
//! `<concept>_<kind>_<YYYYmmdd_HHMMSS>.<ext>`, where `<concept>` is the
//! concept name with spaces replaced by underscores and the timestamp is the
//! run's start time. Result files are created on the first write, so a run
//! that fails before processing any file leaves nothing behind. Output
//! files are always created fresh: a name already taken on disk is an
//! [`CoderError::Output`] error, never a truncate or an append.
//!
//! | Format | Mode | File |
//! |--------|------|------|
//! | text | coding | `<concept>_llm_results_<ts>.txt` |
//! | text | retrieval | `<concept>_relevant_context_<ts>.txt` |
//! | tabular | coding | `<concept>_llm_results_<ts>.csv` |
//! | tabular | retrieval | `<concept>_relevant_context_<ts>.csv` |
//! | (summary) | both | `<concept>_run_<ts>.json` |

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::config::ResultFormat;
use crate::error::{CoderError, Result};
use crate::models::{AnalysisMode, AnalysisResult, Concept, Payload, RunReport, ScoredChunk};

pub const NO_RELEVANT_CONTENT_LINE: &str = "No relevant content found above the similarity threshold.";
pub const NO_RELEVANT_DOCUMENTS_LINE: &str =
    "No relevant documents found above the similarity threshold.";

const LINE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Output directory plus the name parts shared by all files of one run.
#[derive(Debug, Clone)]
pub struct OutputNames {
    dir: PathBuf,
    stem: String,
    stamp: String,
}

impl OutputNames {
    pub fn new(dir: &Path, concept: &Concept, started_at: DateTime<Local>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            stem: concept.file_stem(),
            stamp: started_at.format(FILE_TIME_FORMAT).to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, kind: &str, ext: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}_{}.{}", self.stem, kind, self.stamp, ext))
    }

    fn results_path(&self, mode: AnalysisMode, ext: &str) -> PathBuf {
        match mode {
            AnalysisMode::Coding => self.path("llm_results", ext),
            AnalysisMode::Retrieval => self.path("relevant_context", ext),
        }
    }

    /// Fail if this run's results or summary file already exists, e.g. from
    /// another run of the same concept started in the same second.
    pub fn check_unused(&self, format: ResultFormat, mode: AnalysisMode) -> Result<()> {
        let ext = match format {
            ResultFormat::Text => "txt",
            ResultFormat::Tabular => "csv",
        };
        for path in [self.results_path(mode, ext), self.path("run", "json")] {
            if path.exists() {
                return Err(already_exists(&path));
            }
        }
        Ok(())
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            CoderError::Output(format!(
                "cannot create output directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }
}

fn already_exists(path: &Path) -> CoderError {
    CoderError::Output(format!("output file already exists: {}", path.display()))
}

/// Create a new output file. An existing file is never truncated or appended to.
fn create_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => already_exists(path),
            _ => CoderError::Io(e),
        })
}

/// Sink for per-file results. Each `write` is durable before it returns.
pub trait ResultWriter: Send {
    fn write(&mut self, result: &AnalysisResult) -> Result<()>;

    /// Flush and close. Returns the results file, if one was created.
    fn finish(&mut self) -> Result<Option<PathBuf>>;
}

pub fn create_writer(
    format: ResultFormat,
    mode: AnalysisMode,
    names: OutputNames,
    concept_name: &str,
) -> Box<dyn ResultWriter> {
    match format {
        ResultFormat::Text => Box::new(TextWriter::new(names, mode, concept_name)),
        ResultFormat::Tabular => Box::new(TabularWriter::new(names, mode)),
    }
}

fn mismatch(mode: AnalysisMode, payload: &Payload) -> CoderError {
    let kind = match payload {
        Payload::Completion(_) => "completion",
        Payload::Evidence(_) => "evidence",
        Payload::NoRelevantContent => "empty",
    };
    CoderError::Output(format!(
        "{} payload cannot be written to a {:?} results file",
        kind, mode
    ))
}

// ============ Text ============

pub struct TextWriter {
    names: OutputNames,
    mode: AnalysisMode,
    concept_name: String,
    out: Option<(PathBuf, BufWriter<File>)>,
}

impl TextWriter {
    pub fn new(names: OutputNames, mode: AnalysisMode, concept_name: &str) -> Self {
        Self {
            names,
            mode,
            concept_name: concept_name.to_string(),
            out: None,
        }
    }

    fn open(&mut self) -> Result<&mut BufWriter<File>> {
        if self.out.is_none() {
            self.names.ensure_dir()?;
            let path = self.names.results_path(self.mode, "txt");
            let file = create_output(&path)?;
            let mut out = BufWriter::new(file);
            match self.mode {
                AnalysisMode::Coding => {}
                AnalysisMode::Retrieval => {
                    writeln!(out, "Relevant Context for Concept: {}", self.concept_name)?;
                    writeln!(out, "{}", "=".repeat(50))?;
                }
            }
            self.out = Some((path, out));
        }
        match self.out.as_mut() {
            Some((_, out)) => Ok(out),
            None => Err(CoderError::Output("results file not open".to_string())),
        }
    }
}

fn write_evidence_section(
    out: &mut impl Write,
    file_name: &str,
    evidence: &[ScoredChunk],
) -> std::io::Result<()> {
    writeln!(out)?;
    writeln!(out, "File: {}", file_name)?;
    if evidence.is_empty() {
        writeln!(out, "{}", NO_RELEVANT_DOCUMENTS_LINE)?;
    }
    for scored in evidence {
        writeln!(
            out,
            "Document:\n{}\nScore: {:.4}",
            scored.chunk.text, scored.score
        )?;
        writeln!(out, "{}", "-".repeat(50))?;
    }
    Ok(())
}

impl ResultWriter for TextWriter {
    fn write(&mut self, result: &AnalysisResult) -> Result<()> {
        let mode = self.mode;
        let out = self.open()?;
        match (mode, &result.payload) {
            (AnalysisMode::Coding, Payload::Completion(text)) => {
                writeln!(
                    out,
                    "{} - {} - {}",
                    result.timestamp.format(LINE_TIME_FORMAT),
                    result.file_name(),
                    text
                )?;
            }
            (AnalysisMode::Coding, Payload::NoRelevantContent) => {
                writeln!(
                    out,
                    "{} - {} - {}",
                    result.timestamp.format(LINE_TIME_FORMAT),
                    result.file_name(),
                    NO_RELEVANT_CONTENT_LINE
                )?;
            }
            (AnalysisMode::Retrieval, Payload::Evidence(evidence)) => {
                write_evidence_section(out, &result.file_name(), evidence)?;
            }
            (AnalysisMode::Retrieval, Payload::NoRelevantContent) => {
                write_evidence_section(out, &result.file_name(), &[])?;
            }
            (AnalysisMode::Coding, payload @ Payload::Evidence(_))
            | (AnalysisMode::Retrieval, payload @ Payload::Completion(_)) => {
                return Err(mismatch(mode, payload));
            }
        }
        out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        match self.out.take() {
            Some((path, mut out)) => {
                out.flush()?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

// ============ Tabular ============

pub struct TabularWriter {
    names: OutputNames,
    mode: AnalysisMode,
    out: Option<(PathBuf, csv::Writer<File>)>,
}

impl TabularWriter {
    pub fn new(names: OutputNames, mode: AnalysisMode) -> Self {
        Self {
            names,
            mode,
            out: None,
        }
    }

    fn open(&mut self) -> Result<&mut csv::Writer<File>> {
        if self.out.is_none() {
            self.names.ensure_dir()?;
            let path = self.names.results_path(self.mode, "csv");
            let file = create_output(&path)?;
            let mut out = csv::WriterBuilder::new().from_writer(file);
            match self.mode {
                AnalysisMode::Coding => out.write_record(["file", "timestamp", "response"])?,
                AnalysisMode::Retrieval => out.write_record(["file", "text_chunk", "score"])?,
            }
            self.out = Some((path, out));
        }
        match self.out.as_mut() {
            Some((_, out)) => Ok(out),
            None => Err(CoderError::Output("results file not open".to_string())),
        }
    }
}

impl ResultWriter for TabularWriter {
    fn write(&mut self, result: &AnalysisResult) -> Result<()> {
        let mode = self.mode;
        let file_name = result.file_name();
        let timestamp = result.timestamp.format(LINE_TIME_FORMAT).to_string();
        let out = self.open()?;
        match (mode, &result.payload) {
            (AnalysisMode::Coding, Payload::Completion(text)) => {
                out.write_record([file_name.as_str(), timestamp.as_str(), text.as_str()])?;
            }
            (AnalysisMode::Coding, Payload::NoRelevantContent) => {
                out.write_record([
                    file_name.as_str(),
                    timestamp.as_str(),
                    NO_RELEVANT_CONTENT_LINE,
                ])?;
            }
            (AnalysisMode::Retrieval, Payload::Evidence(evidence)) => {
                for scored in evidence {
                    let score = format!("{:.4}", scored.score);
                    out.write_record([
                        file_name.as_str(),
                        scored.chunk.text.as_str(),
                        score.as_str(),
                    ])?;
                }
            }
            // Only surviving chunks get rows; the run summary records the file.
            (AnalysisMode::Retrieval, Payload::NoRelevantContent) => {}
            (AnalysisMode::Coding, payload @ Payload::Evidence(_))
            | (AnalysisMode::Retrieval, payload @ Payload::Completion(_)) => {
                return Err(mismatch(mode, payload));
            }
        }
        out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<Option<PathBuf>> {
        match self.out.take() {
            Some((path, mut out)) => {
                out.flush()?;
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }
}

// ============ Summary ============

#[derive(Serialize)]
struct Counts {
    total: usize,
    succeeded: usize,
    no_relevant_content: usize,
    failed: usize,
    skipped: usize,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    #[serde(flatten)]
    report: &'a RunReport,
    finished_at: DateTime<Local>,
    counts: Counts,
}

/// Write `report` as pretty JSON to `<concept>_run_<ts>.json`.
pub fn write_summary(names: &OutputNames, report: &RunReport) -> Result<PathBuf> {
    names.ensure_dir()?;
    let path = names.path("run", "json");
    let summary = RunSummary {
        report,
        finished_at: Local::now(),
        counts: Counts {
            total: report.files.len(),
            succeeded: report.succeeded(),
            no_relevant_content: report.no_relevant_content(),
            failed: report.failed(),
            skipped: report.skipped(),
        },
    };
    let mut out = BufWriter::new(create_output(&path)?);
    serde_json::to_writer_pretty(&mut out, &summary)?;
    writeln!(out)?;
    out.flush()?;
    Ok(path)
}
