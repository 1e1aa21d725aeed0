use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunk::{ChunkParams, DEFAULT_SEPARATORS};
use crate::error::CoderError;
use crate::models::PromptSpec;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub prompt: PromptSpec,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub concepts: ConceptsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    Text,
    Tabular,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
    #[serde(default = "default_result_format")]
    pub result_format: ResultFormat,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            max_chunks: default_max_chunks(),
            result_format: default_result_format(),
        }
    }
}

fn default_threshold() -> f32 {
    0.75
}
fn default_max_chunks() -> usize {
    40
}
fn default_result_format() -> ResultFormat {
    ResultFormat::Text
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// Separator cascade, coarsest first. `""` means character boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separators: Option<Vec<String>>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            separators: None,
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_chunk_overlap() -> usize {
    300
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            max_size: self.chunk_size,
            overlap: self.chunk_overlap,
            separators: self.separators.clone().unwrap_or_else(|| {
                DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect()
            }),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutingConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    /// BPE encoding name; resolved from the completion model when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            tokenizer: None,
        }
    }
}

fn default_token_budget() -> usize {
    20_000
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub repair_encoding: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            repair_encoding: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_completion_model(),
            temperature: 0.0,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

fn default_completion_model() -> String {
    "gpt-4o".to_string()
}
fn default_completion_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ConceptsConfig {
    #[serde(default = "default_concepts_path")]
    pub path: PathBuf,
}

impl Default for ConceptsConfig {
    fn default() -> Self {
        Self {
            path: default_concepts_path(),
        }
    }
}

fn default_concepts_path() -> PathBuf {
    PathBuf::from("./config/concepts.toml")
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./results")
}

const PROVIDERS: &[&str] = &["openai", "ollama"];

impl Config {
    /// Check every value the pipeline depends on. Called once at load time
    /// and again after CLI overrides are applied.
    pub fn validate(&self) -> Result<(), CoderError> {
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.threshold) {
            return Err(CoderError::config(format!(
                "retrieval.threshold must be in [0.0, 1.0], got {}",
                r.threshold
            )));
        }
        if r.max_chunks == 0 {
            return Err(CoderError::config("retrieval.max_chunks must be >= 1"));
        }

        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(CoderError::config("chunking.chunk_size must be > 0"));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(CoderError::config(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if matches!(&c.separators, Some(seps) if seps.is_empty()) {
            return Err(CoderError::config(
                "chunking.separators must list at least one separator",
            ));
        }

        if self.routing.token_budget == 0 {
            return Err(CoderError::config("routing.token_budget must be > 0"));
        }

        if self.embedding.batch_size == 0 {
            return Err(CoderError::config("embedding.batch_size must be > 0"));
        }
        for (section, provider) in [
            ("embedding", self.embedding.provider.as_str()),
            ("completion", self.completion.provider.as_str()),
        ] {
            if !PROVIDERS.contains(&provider) {
                return Err(CoderError::config(format!(
                    "Unknown {} provider: '{}'. Must be openai or ollama.",
                    section, provider
                )));
            }
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// Write the whole configuration back in one go.
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    config.validate()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.chunk_size, 1500);
        assert_eq!(config.chunking.chunk_overlap, 300);
        assert_eq!(config.routing.token_budget, 20_000);
        assert_eq!(config.retrieval.result_format, ResultFormat::Text);
        assert_eq!(config.completion.model, "gpt-4o");
        assert!(config.extraction.repair_encoding);
    }

    #[test]
    fn overlap_not_smaller_than_size_is_rejected() {
        let config: Config = toml::from_str(
            r#"
[chunking]
chunk_size = 300
chunk_overlap = 300
"#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, CoderError::Configuration(_)));
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.retrieval.threshold = 1.2;
        assert!(config.validate().is_err());
        config.retrieval.threshold = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config: Config = toml::from_str(
            r#"
[embedding]
provider = "disabled"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn tabular_format_parses() {
        let config: Config = toml::from_str(
            r#"
[retrieval]
threshold = 0.6
max_chunks = 5
result_format = "tabular"
"#,
        )
        .unwrap();
        assert_eq!(config.retrieval.result_format, ResultFormat::Tabular);
        assert_eq!(config.retrieval.max_chunks, 5);
    }

    #[test]
    fn save_then_load_keeps_prompt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("coder.toml");
        let mut config = Config::default();
        config.prompt.system_message = "You are a careful coder.".to_string();
        config.retrieval.threshold = 0.5;
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.prompt.system_message, "You are a careful coder.");
        assert!((loaded.retrieval.threshold - 0.5).abs() < f32::EPSILON);
    }
}
