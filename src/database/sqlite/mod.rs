use anyhow::Context;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info};

use super::DocumentStore;
use crate::database::sqlite::models::{Document, SimilarityMatch};
use crate::database::sqlite::queries::DocumentQueries;
use crate::rag::similarity::{ensure_finite, rank_by_similarity};
use crate::{RagError, Result};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

pub const DATABASE_FILE_NAME: &str = "documents.db";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

fn database_error(error: &anyhow::Error) -> RagError {
    RagError::Database(format!("{error:#}"))
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> anyhow::Result<Self> {
        let db_path = config_dir.join(DATABASE_FILE_NAME);

        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(&db_path).await
    }

    #[inline]
    pub async fn get(&self, id: i64) -> Result<Document> {
        DocumentQueries::get_by_id(&self.pool, id)
            .await
            .map_err(|e| database_error(&e))?
            .ok_or(RagError::NotFound { id })
    }

    #[inline]
    pub async fn list(&self) -> Result<Vec<Document>> {
        DocumentQueries::list_all(&self.pool)
            .await
            .map_err(|e| database_error(&e))
    }

    #[inline]
    pub async fn count(&self) -> Result<i64> {
        DocumentQueries::count(&self.pool)
            .await
            .map_err(|e| database_error(&e))
    }
}

#[async_trait]
impl DocumentStore for Database {
    #[inline]
    async fn insert(
        &self,
        content: &str,
        metadata: &Map<String, Value>,
        embedding: &[f32],
    ) -> Result<Document> {
        ensure_finite(embedding)?;

        DocumentQueries::create(&self.pool, content, metadata, embedding)
            .await
            .map_err(|e| database_error(&e))
    }

    #[inline]
    async fn query_by_similarity(
        &self,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<SimilarityMatch>> {
        let documents = self.list().await?;
        let scanned = documents.len();
        let matches = rank_by_similarity(embedding, documents, threshold, limit);

        debug!(
            "Similarity query scanned {} documents, {} matched at threshold {}",
            scanned,
            matches.len(),
            threshold
        );
        Ok(matches)
    }

    #[inline]
    async fn delete_by_id(&self, id: i64) -> Result<()> {
        let deleted = DocumentQueries::delete(&self.pool, id)
            .await
            .map_err(|e| database_error(&e))?;

        if deleted {
            info!("Deleted document {}", id);
            Ok(())
        } else {
            Err(RagError::NotFound { id })
        }
    }
}
