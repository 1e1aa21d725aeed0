//! The concept codebook: named concepts and their descriptions.
//!
//! Stored as TOML with one `[concepts]` table:
//!
//! ```toml
//! [concepts]
//! Trust = "Reliance on the integrity, ability or character of another person"
//! "Financial strain" = "Worry about money, debt or making ends meet"
//! ```
//!
//! Names are unique ignoring ASCII case, and lookups ignore case too when no
//! exact match exists.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoderError, Result};
use crate::models::Concept;

#[derive(Debug, Default, Deserialize, Serialize)]
struct ConceptFile {
    #[serde(default)]
    concepts: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct ConceptStore {
    path: PathBuf,
    concepts: Vec<Concept>,
}

impl ConceptStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        let concepts = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let file: ConceptFile = toml::from_str(&content).map_err(|e| {
                CoderError::config(format!(
                    "failed to parse concept store {}: {}",
                    path.display(),
                    e
                ))
            })?;
            file.concepts
                .into_iter()
                .map(|(name, description)| Concept::new(name, description))
                .collect()
        } else {
            Vec::new()
        };

        debug!(path = %path.display(), count = concepts.len(), "loaded concepts");
        Ok(Self {
            path: path.to_path_buf(),
            concepts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All concepts, ordered by name.
    pub fn list(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<&Concept> {
        self.position(name)
            .map(|i| &self.concepts[i])
            .ok_or_else(|| CoderError::ConceptNotFound(name.to_string()))
    }

    /// Add a new concept. Rejects empty fields and existing names.
    pub fn add(&mut self, concept: Concept) -> Result<()> {
        let concept = validated(concept)?;
        if self.position(&concept.name).is_some() {
            return Err(CoderError::DuplicateConcept(concept.name));
        }
        self.insert_sorted(concept);
        Ok(())
    }

    /// Add or replace a concept.
    pub fn put(&mut self, concept: Concept) -> Result<()> {
        let concept = validated(concept)?;
        match self.position(&concept.name) {
            Some(i) => self.concepts[i] = concept,
            None => self.insert_sorted(concept),
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Concept> {
        let i = self
            .position(name)
            .ok_or_else(|| CoderError::ConceptNotFound(name.to_string()))?;
        Ok(self.concepts.remove(i))
    }

    /// Write the whole store back to its file.
    pub fn save(&self) -> Result<()> {
        let file = ConceptFile {
            concepts: self
                .concepts
                .iter()
                .map(|c| (c.name.clone(), c.description.clone()))
                .collect(),
        };
        let content = toml::to_string_pretty(&file)
            .map_err(|e| CoderError::Output(format!("failed to serialize concepts: {}", e)))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.trim();
        self.concepts
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.concepts
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
    }

    fn insert_sorted(&mut self, concept: Concept) {
        let at = self
            .concepts
            .partition_point(|c| c.name.as_str() < concept.name.as_str());
        self.concepts.insert(at, concept);
    }
}

fn validated(concept: Concept) -> Result<Concept> {
    let name = concept.name.trim().to_string();
    let description = concept.description.trim().to_string();
    if name.is_empty() || description.is_empty() {
        return Err(CoderError::config(
            "concept name and description must both be non-empty",
        ));
    }
    Ok(Concept::new(name, description))
}
