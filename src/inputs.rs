use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use walkdir::{DirEntry, WalkDir};

use crate::extract::is_supported;

/// Expand command-line inputs into the list of files to process.
///
/// Files are kept as given, even with an unsupported extension, so the run
/// reports them. Directories are walked recursively for supported files,
/// skipping hidden entries, and each directory's files are sorted for a
/// deterministic order. Duplicates are dropped.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            let walker = WalkDir::new(input)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
            for entry in walker {
                let entry = entry?;
                if entry.file_type().is_file() && is_supported(entry.path()) {
                    found.push(entry.into_path());
                }
            }
            found.sort();
            for path in found {
                if seen.insert(path.clone()) {
                    files.push(path);
                }
            }
        } else if seen.insert(input.clone()) {
            files.push(input.clone());
        }
    }

    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}
