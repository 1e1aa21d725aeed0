//! Ephemeral similarity index over one document's chunks.
//!
//! An [`EvidenceIndex`] is built per file, queried once, and dropped. Scores
//! come from [`relevance_score`]; ranking keeps the top `k` and only then
//! applies the threshold, so a query never returns more than `k` chunks and
//! raising the threshold can only remove results.

use std::cmp::Ordering;

use tracing::debug;

use crate::embedding::{embed_query, relevance_score, Embedder};
use crate::error::{CoderError, Result, Service};
use crate::models::{Chunk, ScoredChunk};

pub struct EvidenceIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl EvidenceIndex {
    /// Embed `chunks` in batches of `batch_size` and keep the vectors.
    pub async fn build(
        embedder: &dyn Embedder,
        chunks: Vec<Chunk>,
        batch_size: usize,
    ) -> Result<Self> {
        let batch_size = batch_size.max(1);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(CoderError::upstream(
                    Service::Embedding,
                    format!(
                        "expected {} vectors, got {}",
                        texts.len(),
                        embedded.len()
                    ),
                ));
            }
            vectors.extend(embedded);
        }

        if let Some(first) = vectors.first() {
            let dims = first.len();
            if dims == 0 || vectors.iter().any(|v| v.len() != dims) {
                return Err(CoderError::upstream(
                    Service::Embedding,
                    "embedding vectors have inconsistent dimensions",
                ));
            }
        }

        debug!(
            chunks = chunks.len(),
            model = embedder.model_name(),
            "built evidence index"
        );
        Ok(Self { chunks, vectors })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Embed `query` and return at most `k` chunks scoring `>= threshold`,
    /// best first. An empty vector means nothing was relevant enough.
    pub async fn query(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>> {
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = embed_query(embedder, query).await?;
        if query_vec.len() != self.vectors[0].len() {
            return Err(CoderError::upstream(
                Service::Embedding,
                format!(
                    "query vector has {} dimensions, index has {}",
                    query_vec.len(),
                    self.vectors[0].len()
                ),
            ));
        }
        Ok(self.search(&query_vec, k, threshold))
    }

    /// Score every stored vector against `query_vec` and rank.
    pub fn search(&self, query_vec: &[f32], k: usize, threshold: f32) -> Vec<ScoredChunk> {
        let scores: Vec<f32> = self
            .vectors
            .iter()
            .map(|v| relevance_score(query_vec, v))
            .collect();

        let ranked = rank(&scores, k, threshold);
        debug!(
            candidates = scores.len(),
            kept = ranked.len(),
            threshold,
            "ranked chunks"
        );
        ranked
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }
}

/// Order `scores` descending (ties by position), keep the first `k`, then
/// drop those below `threshold`. Returns `(position, score)` pairs.
pub fn rank(scores: &[f32], k: usize, threshold: f32) -> Vec<(usize, f32)> {
    let mut order: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    order.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    order.truncate(k);
    order.retain(|(_, score)| *score >= threshold);
    order
}
