//! Embedding capability: the [`Embedder`] trait and its HTTP providers.
//!
//! - **[`OpenAiEmbedder`]** calls the OpenAI embeddings API (`OPENAI_API_KEY`).
//! - **[`OllamaEmbedder`]** calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides the vector helpers the evidence index scores with:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`relevance_score`]: distance-based relevance in `[0, 1]`
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to instantiate the provider named by
//! `embedding.provider`. Providers own their retry policy; see
//! the `http` module for the backoff schedule.

use async_trait::async_trait;
use reqwest::Client;

use crate::config::EmbeddingConfig;
use crate::error::{CoderError, Result, Service};
use crate::http::{build_client, send_json};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Maps texts to fixed-length vectors. Implementations must return exactly
/// one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| CoderError::upstream(Service::Embedding, "empty embedding response"))
}

pub(crate) fn openai_api_key() -> Result<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| CoderError::config("OPENAI_API_KEY environment variable not set"))
}

// ============ OpenAI Provider ============

/// Calls `POST {url}/embeddings` with batched input.
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    url: String,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Fails with [`CoderError::Configuration`] if `OPENAI_API_KEY` is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = openai_api_key()?;
        Ok(Self {
            client: build_client(Service::Embedding, config.timeout_secs)?,
            api_key,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_json(
            || {
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            Service::Embedding,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extracts `data[].embedding`, ordered by `data[].index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| invalid("OpenAI", "missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_vector("OpenAI", embedding)?));
    }
    indexed.sort_by_key(|(i, _)| *i);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Calls `POST {url}/api/embed`. Requires Ollama running with the embedding
/// model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: Client,
    model: String,
    url: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(Service::Embedding, config.timeout_secs)?,
            model: config.model.clone(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string()),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = send_json(
            || self.client.post(&url).json(&body),
            self.max_retries,
            Service::Embedding,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("Ollama", "missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            let values = e
                .as_array()
                .ok_or_else(|| invalid("Ollama", "embedding is not an array"))?;
            to_vector("Ollama", values)
        })
        .collect()
}

fn to_vector(label: &str, values: &[serde_json::Value]) -> Result<Vec<f32>> {
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|x| x as f32)
                .ok_or_else(|| invalid(label, "non-numeric embedding value"))
        })
        .collect()
}

fn invalid(label: &str, what: &str) -> CoderError {
    CoderError::upstream(
        Service::Embedding,
        format!("Invalid {} response: {}", label, what),
    )
}

/// Create the [`Embedder`] named by `embedding.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        other => Err(CoderError::config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, or a zero vector.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Relevance of `b` to `a` in `[0.0, 1.0]`.
///
/// Both vectors are L2-normalized and the Euclidean distance `d` between
/// them is mapped to `1 - d/√2`, clamped. Identical directions score 1;
/// orthogonal and opposite ones score 0.
///
/// For unit vectors `d = √(2 - 2·cos θ)`, so this is computed from
/// [`cosine_similarity`], and degenerate input scores 0.
pub fn relevance_score(a: &[f32], b: &[f32]) -> f32 {
    let cos = cosine_similarity(a, b);
    let distance = (2.0 - 2.0 * cos).max(0.0).sqrt();
    (1.0 - distance / std::f32::consts::SQRT_2).clamp(0.0, 1.0)
}
