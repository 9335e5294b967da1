use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use sha2::Digest as _;
use tokio::sync::Mutex;

use crate::cost::CostLedger;
use crate::llm::LlmResponse;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input, in input order.
    async fn embed_texts(&self, texts: &[String]) -> anyhow::Result<LlmResponse<Vec<Vec<f32>>>>;
}

/// An embedder handle that books every call into the run's ledger.
#[derive(Clone)]
pub struct MeteredEmbedder {
    embedder: Arc<dyn Embedder>,
    ledger: Arc<CostLedger>,
}

impl MeteredEmbedder {
    pub fn new(embedder: Arc<dyn Embedder>, ledger: Arc<CostLedger>) -> Self {
        Self { embedder, ledger }
    }

    pub async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let response = self.embedder.embed_texts(texts).await?;
        self.ledger
            .add_cost(response.cost, Some(response.usage.total_tokens));
        tracing::debug!(
            inputs = texts.len(),
            tokens = response.usage.total_tokens,
            cost = response.cost,
            duration_ms = response.duration.as_millis() as u64,
            "embedding call complete"
        );
        Ok(response.data)
    }
}

/// Cosine similarity in [-1, 1]. Empty, mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Key points not yet written, in their original order.
pub fn uncovered_points(all: &[String], covered: &[String]) -> Vec<String> {
    let covered = covered.iter().map(String::as_str).collect::<HashSet<_>>();
    all.iter()
        .filter(|point| !covered.contains(point.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionContext {
    pub key_points: Vec<String>,
    pub reference_excerpt: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextQuery<'a> {
    pub section_title: &'a str,
    pub all_key_points: &'a [String],
    pub covered_points: &'a [String],
    pub reference_content: &'a str,
}

#[async_trait]
pub trait ContextFilter: Send + Sync {
    async fn select(&self, query: ContextQuery<'_>) -> anyhow::Result<SectionContext>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExclusionFilter;

#[async_trait]
impl ContextFilter for ExclusionFilter {
    async fn select(&self, query: ContextQuery<'_>) -> anyhow::Result<SectionContext> {
        Ok(SectionContext {
            key_points: uncovered_points(query.all_key_points, query.covered_points),
            reference_excerpt: None,
        })
    }
}

type EmbeddedChunks = Arc<Vec<(String, Vec<f32>)>>;

struct ChunkCache {
    reference_digest: String,
    chunks: EmbeddedChunks,
}

/// Adds the reference chunks closest to the section title. Chunk embeddings
/// are cached per reference text and rebuilt when the reference changes.
pub struct SemanticFilter {
    embedder: MeteredEmbedder,
    top_k: usize,
    max_chunk_chars: usize,
    cache: Mutex<Option<ChunkCache>>,
}

impl SemanticFilter {
    pub fn new(embedder: MeteredEmbedder) -> Self {
        Self {
            embedder,
            top_k: 3,
            max_chunk_chars: 1200,
            cache: Mutex::new(None),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars.max(1);
        self
    }

    async fn embedded_chunks(&self, reference: &str) -> anyhow::Result<EmbeddedChunks> {
        let digest = sha256_hex(reference);
        // Held across the embedding call so concurrent sections share one batch.
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.reference_digest == digest
        {
            return Ok(Arc::clone(&cached.chunks));
        }

        let chunks = chunk_paragraphs(reference, self.max_chunk_chars);
        let vectors = self
            .embedder
            .embed(&chunks)
            .await
            .context("embed reference chunks")?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }
        tracing::debug!(chunks = chunks.len(), "embedded reference chunks");

        let chunks: EmbeddedChunks = Arc::new(chunks.into_iter().zip(vectors).collect());
        *cache = Some(ChunkCache {
            reference_digest: digest,
            chunks: Arc::clone(&chunks),
        });
        Ok(chunks)
    }
}

fn sha256_hex(input: &str) -> String {
    let digest = sha2::Sha256::digest(input.as_bytes());
    hex::encode(digest)
}

#[async_trait]
impl ContextFilter for SemanticFilter {
    async fn select(&self, query: ContextQuery<'_>) -> anyhow::Result<SectionContext> {
        let key_points = uncovered_points(query.all_key_points, query.covered_points);
        if query.reference_content.trim().is_empty() {
            return Ok(SectionContext {
                key_points,
                reference_excerpt: None,
            });
        }

        let chunks = self.embedded_chunks(query.reference_content).await?;
        let title_vector = self
            .embedder
            .embed(&[query.section_title.to_owned()])
            .await
            .context("embed section title")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for section title"))?;

        let mut scored = chunks
            .iter()
            .enumerate()
            .map(|(idx, (_, vector))| (idx, cosine_similarity(&title_vector, vector)))
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut selected = scored
            .into_iter()
            .take(self.top_k)
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();
        selected.sort_unstable();

        let excerpt = selected
            .into_iter()
            .map(|idx| chunks[idx].0.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(SectionContext {
            key_points,
            reference_excerpt: (!excerpt.trim().is_empty()).then_some(excerpt),
        })
    }
}

/// Packs blank-line separated paragraphs into chunks of at most `max_chars`
/// bytes. Oversized paragraphs become their own chunk.
pub fn chunk_paragraphs(input: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in input.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if !current.is_empty() && current.len() + paragraph.len() + 2 > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
