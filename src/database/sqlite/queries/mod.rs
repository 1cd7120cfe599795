
use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use tracing::{debug, warn};

const DOCUMENT_COLUMNS: &str = "id, content, metadata, embedding, created_at";

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a document and read it back in one transaction
    #[inline]
    pub async fn create(
        pool: &SqlitePool,
        content: &str,
        metadata: &Map<String, Value>,
        embedding: &[f32],
    ) -> Result<Document> {
        let metadata_json =
            serde_json::to_string(metadata).context("Failed to serialize document metadata")?;
        let embedding_json =
            serde_json::to_string(embedding).context("Failed to serialize document embedding")?;
        let now = Utc::now();

        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "INSERT INTO documents (content, metadata, embedding, created_at) VALUES (?, ?, ?, ?) RETURNING {DOCUMENT_COLUMNS}"
        ))
        .bind(content)
        .bind(&metadata_json)
        .bind(&embedding_json)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to insert document")?;

        // A row that cannot be read back is rolled back when `tx` drops
        let id = row.id;
        let document = Document::try_from(row)
            .with_context(|| format!("Document {id} would be stored with corrupt JSON columns"))?;

        tx.commit().await.context("Failed to commit document")?;

        debug!("Inserted document {} ({} dimensions)", id, embedding.len());
        Ok(document)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")?;

        row.map(|r| {
            Document::try_from(r).with_context(|| format!("Document {id} has corrupt JSON columns"))
        })
        .transpose()
    }

    /// Every readable document in insertion order. Rows whose JSON columns
    /// no longer parse are logged and skipped.
    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DocumentRow>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id ASC"
        ))
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let id = r.id;
                Document::try_from(r)
                    .inspect_err(|e| warn!("Skipping document {} with corrupt JSON columns: {}", id, e))
                    .ok()
            })
            .collect())
    }

    /// Returns whether a row was removed
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count documents")?;

        Ok(count)
    }
}
