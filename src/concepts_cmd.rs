//! `coder concepts`: manage the concept codebook.

use anyhow::{Context, Result};

use crate::concepts::ConceptStore;
use crate::config::Config;
use crate::models::Concept;

fn open_store(config: &Config) -> Result<ConceptStore> {
    ConceptStore::load(&config.concepts.path).with_context(|| {
        format!(
            "Failed to load concept store: {}",
            config.concepts.path.display()
        )
    })
}

pub fn list_concepts(config: &Config) -> Result<()> {
    let store = open_store(config)?;
    if store.is_empty() {
        println!("No concepts defined in {}.", store.path().display());
        return Ok(());
    }
    println!("{:<24} DESCRIPTION", "CONCEPT");
    for concept in store.list() {
        println!("{:<24} {}", concept.name, truncate(&concept.description, 72));
    }
    Ok(())
}

pub fn show_concept(config: &Config, name: &str) -> Result<()> {
    let store = open_store(config)?;
    let concept = store.get(name)?;
    println!("name:        {}", concept.name);
    println!("description: {}", concept.description);
    Ok(())
}

/// Add a concept, or replace its description when `replace` is set.
pub fn add_concept(config: &Config, name: &str, description: &str, replace: bool) -> Result<()> {
    let mut store = open_store(config)?;
    let concept = Concept::new(name, description);
    if replace {
        store.put(concept)?;
    } else {
        store.add(concept)?;
    }
    store.save()?;
    println!("Concept '{}' saved to {}.", name.trim(), store.path().display());
    Ok(())
}

pub fn remove_concept(config: &Config, name: &str) -> Result<()> {
    let mut store = open_store(config)?;
    let removed = store.remove(name)?;
    store.save()?;
    println!("Concept '{}' removed.", removed.name);
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_long_descriptions() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line one\nline two", 40), "line one line two");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }
}
