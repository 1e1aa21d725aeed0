//! `coder inspect`: show how each input would be handled, without any
//! network call.

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::error;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::extract::extract;
use crate::inputs::expand_inputs;
use crate::models::file_name;
use crate::routing::{BpeCounter, RouteDecision, RoutingPolicy, TokenizerKind};

/// What `inspect` learned about one file.
#[derive(Debug, Clone)]
pub struct FileInspection {
    pub file: PathBuf,
    pub chars: usize,
    pub decision: RouteDecision,
    pub chunks: usize,
    pub oversized: usize,
}

pub fn inspect_files(config: &Config, inputs: &[PathBuf]) -> Result<Vec<FileInspection>> {
    let files = expand_inputs(inputs)?;
    if files.is_empty() {
        bail!("No input files found");
    }

    let tokenizer = TokenizerKind::resolve(
        config.routing.tokenizer.as_deref(),
        &config.completion.model,
    )?;
    let router = RoutingPolicy::new(
        config.routing.token_budget,
        Box::new(BpeCounter::new(tokenizer)?),
    );
    let params = config.chunking.params();

    let mut out = Vec::with_capacity(files.len());
    for path in files {
        let doc = match extract(&path, config.extraction.repair_encoding) {
            Ok(doc) => doc,
            Err(e) => {
                error!(file = %path.display(), kind = e.kind(), "{}", e);
                continue;
            }
        };
        let chunks = chunk_text(&doc.file_name(), &doc.text, &params)?;
        out.push(FileInspection {
            file: path,
            chars: doc.text.chars().count(),
            decision: router.choose_path(&doc.text),
            chunks: chunks.len(),
            oversized: chunks.iter().filter(|c| c.oversized).count(),
        });
    }
    Ok(out)
}

pub fn run_inspect(config: &Config, inputs: &[PathBuf]) -> Result<()> {
    let inspections = inspect_files(config, inputs)?;

    println!(
        "{:<32} {:>10} {:>10} {:<9} {:>7} {:>9}",
        "FILE", "CHARS", "TOKENS", "ROUTE", "CHUNKS", "OVERSIZED"
    );
    for i in &inspections {
        println!(
            "{:<32} {:>10} {:>10} {:<9} {:>7} {:>9}",
            file_name(&i.file),
            i.chars,
            i.decision.tokens,
            i.decision.path.to_string(),
            i.chunks,
            i.oversized
        );
    }
    println!();
    println!(
        "token budget: {}  chunk size: {}  overlap: {}",
        config.routing.token_budget, config.chunking.chunk_size, config.chunking.chunk_overlap
    );
    Ok(())
}
