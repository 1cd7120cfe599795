//! Retrieval-augmented question answering.
//!
//! A search embeds the query, ranks stored documents by cosine similarity,
//! joins the best matches into a context block and asks the generation
//! model to answer from it.

pub mod context;
pub mod similarity;


use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{DocumentStore, SimilarityMatch};
use crate::llm::{EmbeddingProvider, GenerationOptions, GenerationProvider, RequestOptions};
use crate::{RagError, Result};

pub use context::{assemble_context, build_prompt};
pub use similarity::{cosine_similarity, ensure_finite, rank_by_similarity};

pub const STORED_STATUS: &str = "stored";

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub answer: String,
    pub context: String,
    pub matches: Vec<SimilarityMatch>,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreReceipt {
    pub id: i64,
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Effective retrieval bounds for one search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    pub threshold: f64,
    pub limit: usize,
}

impl RetrievalParams {
    #[inline]
    pub fn resolve(request: &RequestOptions, config: &Config) -> Result<Self> {
        let threshold = request
            .similarity_threshold
            .unwrap_or(config.rag.similarity_threshold);
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(RagError::InvalidOptions(format!(
                "similarity threshold {threshold} is outside [-1, 1]"
            )));
        }

        let limit = request.max_results.unwrap_or(config.rag.max_results);
        if limit == 0 {
            return Err(RagError::InvalidOptions(
                "max_results must be at least 1".to_string(),
            ));
        }

        Ok(Self { threshold, limit })
    }
}

pub struct RagEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    store: Arc<dyn DocumentStore>,
    config: Config,
}

impl RagEngine {
    #[inline]
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        store: Arc<dyn DocumentStore>,
        config: Config,
    ) -> Self {
        Self {
            embedder,
            generator,
            store,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Answer `query` from the most similar stored documents
    #[inline]
    pub async fn search(&self, query: &str, request: &RequestOptions) -> Result<SearchOutcome> {
        let request_id = Uuid::new_v4();
        let options = GenerationOptions::resolve(request, &self.config)?;
        let params = RetrievalParams::resolve(request, &self.config)?;

        info!(
            "[{}] Search with model {} (threshold {}, limit {})",
            request_id, options.model, params.threshold, params.limit
        );

        let query_embedding = self.embedder.embed(query).await.inspect_err(|e| {
            error!("[{}] Failed to embed query: {}", request_id, e);
        })?;

        let matches = self
            .store
            .query_by_similarity(&query_embedding, params.threshold, params.limit)
            .await
            .inspect_err(|e| {
                error!("[{}] Similarity query failed: {}", request_id, e);
            })?;

        debug!("[{}] Retrieved {} matches", request_id, matches.len());

        let context = assemble_context(&matches);
        let prompt = build_prompt(&context, query);

        let generation = self
            .generator
            .generate(&prompt, &options)
            .await
            .inspect_err(|e| {
                error!("[{}] Generation failed: {}", request_id, e);
            })?;

        info!(
            "[{}] Answered with {} context documents",
            request_id,
            matches.len()
        );

        Ok(SearchOutcome {
            answer: generation.text,
            context,
            matches,
            options,
        })
    }

    /// Embed and persist `content`. Nothing is stored unless embedding succeeds.
    #[inline]
    pub async fn store(
        &self,
        content: &str,
        metadata: &Map<String, Value>,
    ) -> Result<StoreReceipt> {
        let embedding = self.embedder.embed(content).await.inspect_err(|e| {
            error!(
                "Failed to embed document (length {}): {}",
                content.len(),
                e
            );
        })?;

        let document = self
            .store
            .insert(content, metadata, &embedding)
            .await
            .inspect_err(|e| {
                error!("Failed to store document: {}", e);
            })?;

        info!("Stored document {}", document.id);

        Ok(StoreReceipt {
            id: document.id,
            status: STORED_STATUS,
            timestamp: document.created_at,
        })
    }

    #[inline]
    pub async fn delete(&self, id: i64) -> Result<()> {
        self.store.delete_by_id(id).await.inspect_err(|e| {
            error!("Failed to delete document {}: {}", id, e);
        })
    }
}
