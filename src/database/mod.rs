//! Document persistence.
//!
//! The RAG engine only talks to [`DocumentStore`]; [`sqlite::Database`] is the
//! shipped implementation.

pub mod sqlite;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Result;

pub use sqlite::Database;
pub use sqlite::models::{Document, SimilarityMatch};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a fully embedded document. Nothing is written on failure.
    async fn insert(
        &self,
        content: &str,
        metadata: &Map<String, Value>,
        embedding: &[f32],
    ) -> Result<Document>;

    /// Matches with cosine similarity `>= threshold`, best first, at most `limit`.
    async fn query_by_similarity(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityMatch>>;

    /// Fails with [`crate::RagError::NotFound`] when no document has `id`.
    async fn delete_by_id(&self, id: i64) -> Result<()>;
}
