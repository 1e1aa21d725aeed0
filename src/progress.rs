//! Run progress reporting.
//!
//! Reports observable progress during `coder run` so users see which file is
//! being worked on, how much is left, and how each file ended up.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

use crate::models::FileStatus;

/// A single progress event for a run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// File `n` of `total` is starting (1-based).
    Started { file: String, n: usize, total: usize },
    /// File `n` of `total` is done.
    Finished {
        file: String,
        n: usize,
        total: usize,
        status: FileStatus,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the coding pipeline.
    fn report(&self, event: RunProgressEvent);
}

/// Short label for a file outcome, e.g. `coded (direct)`.
pub fn describe(status: &FileStatus) -> String {
    match status {
        FileStatus::Coded { route } => format!("coded ({})", route),
        FileStatus::Evidence { route, chunks } => {
            format!("{} relevant chunk(s) ({})", chunks, route)
        }
        FileStatus::NoRelevantContent { route } => format!("no relevant content ({})", route),
        FileStatus::Failed { kind, message } => format!("failed [{}]: {}", kind, message),
        FileStatus::Skipped => "skipped".to_string(),
    }
}

/// Human-friendly progress on stderr: "run  [2/5]  interview.txt  coded (direct)".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Started { file, n, total } => {
                format!("run  [{}/{}]  {}  ...\n", n, total, file)
            }
            RunProgressEvent::Finished {
                file,
                n,
                total,
                status,
            } => format!("run  [{}/{}]  {}  {}\n", n, total, file, describe(status)),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Started { file, n, total } => serde_json::json!({
                "event": "progress",
                "phase": "started",
                "file": file,
                "n": n,
                "total": total
            }),
            RunProgressEvent::Finished {
                file,
                n,
                total,
                status,
            } => serde_json::json!({
                "event": "progress",
                "phase": "finished",
                "file": file,
                "n": n,
                "total": total,
                "result": status
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    #[value(name = "none")]
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoutePath;

    #[test]
    fn describe_statuses() {
        assert_eq!(
            describe(&FileStatus::Coded {
                route: RoutePath::Direct
            }),
            "coded (direct)"
        );
        assert_eq!(
            describe(&FileStatus::Evidence {
                route: RoutePath::Retrieve,
                chunks: 3
            }),
            "3 relevant chunk(s) (retrieve)"
        );
        assert_eq!(
            describe(&FileStatus::Failed {
                kind: "extraction".to_string(),
                message: "bad pdf".to_string()
            }),
            "failed [extraction]: bad pdf"
        );
        assert_eq!(describe(&FileStatus::Skipped), "skipped");
    }
}
