use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, Result};

const VOYAGE_EMBED_URL: &str = "https://api.voyageai.com/v1/embeddings";

/// Texts sent per embeddings request.
pub const EMBED_CHUNK_SIZE: usize = 128;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

pub struct VoyageEmbedder {
    client: Client,
    api_key: String,
    model: String,
}

impl VoyageEmbedder {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Embedder for VoyageEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let chunks = texts.len().div_ceil(EMBED_CHUNK_SIZE);

        for (i, chunk) in texts.chunks(EMBED_CHUNK_SIZE).enumerate() {
            tracing::info!(chunk = i + 1, chunks, "embedding documents");
            let body = json!({
                "input": chunk,
                "model": self.model,
                "input_type": "document",
            });

            let response = self
                .client
                .post(VOYAGE_EMBED_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let message = response.text().await?;
                return Err(if status.as_u16() == 429 {
                    AppError::RateLimited {
                        provider: "Voyage",
                        message,
                    }
                } else {
                    AppError::Api {
                        provider: "Voyage",
                        message: format!("HTTP {status}: {message}"),
                    }
                });
            }

            let mut parsed: EmbeddingResponse = response.json().await?;
            parsed.data.sort_by_key(|entry| entry.index);
            if parsed.data.len() != chunk.len() {
                return Err(AppError::Api {
                    provider: "Voyage",
                    message: format!(
                        "returned {} embeddings for {} inputs",
                        parsed.data.len(),
                        chunk.len()
                    ),
                });
            }
            vectors.extend(parsed.data.into_iter().map(|entry| entry.embedding));
        }

        Ok(vectors)
    }
}

/// Embeddings of the clustering corpus, in corpus order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSet {
    pub model: String,
    pub ids: Vec<i64>,
    pub vectors: Vec<Vec<f32>>,
}

impl EmbeddingSet {
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn dimensions(&self) -> usize {
        self.vectors.first().map(Vec::len).unwrap_or(0)
    }
}

/// On-disk cache keyed by corpus size: a cached set is reused only while the
/// corpus still has exactly as many documents.
pub struct EmbeddingCache {
    path: PathBuf,
}

impl EmbeddingCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self, corpus_size: usize) -> Result<Option<EmbeddingSet>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let set: EmbeddingSet = serde_json::from_str(&content)?;
        if set.len() != corpus_size {
            tracing::info!(
                cached = set.len(),
                corpus = corpus_size,
                "embedding cache size mismatch, regenerating"
            );
            return Ok(None);
        }
        Ok(Some(set))
    }

    pub fn save(&self, set: &EmbeddingSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string(set)?)?;
        Ok(())
    }
}

/// Returns cached embeddings for `documents` when the corpus size still
/// matches, otherwise embeds and caches them.
pub async fn ensure_embeddings(
    embedder: &dyn Embedder,
    cache: &EmbeddingCache,
    documents: &[(i64, String)],
) -> Result<EmbeddingSet> {
    if let Some(set) = cache.load(documents.len())? {
        tracing::info!(
            count = set.len(),
            path = %cache.path().display(),
            "using cached embeddings"
        );
        return Ok(set);
    }

    let texts: Vec<String> = documents.iter().map(|(_, text)| text.clone()).collect();
    let vectors = embedder.embed_documents(&texts).await?;
    let set = EmbeddingSet {
        model: embedder.model().to_string(),
        ids: documents.iter().map(|(id, _)| *id).collect(),
        vectors,
    };
    cache.save(&set)?;
    tracing::info!(count = set.len(), dimensions = set.dimensions(), "saved embeddings");
    Ok(set)
}
