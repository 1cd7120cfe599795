#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

/// A stored document together with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub content: String,
    pub metadata: Map<String, Value>,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Raw `documents` row; metadata and embedding are JSON text
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DocumentRow {
    pub id: i64,
    pub content: String,
    pub metadata: String,
    pub embedding: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityMatch {
    pub document: Document,
    pub similarity: f64,
}

impl TryFrom<DocumentRow> for Document {
    type Error = serde_json::Error;

    #[inline]
    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            content: row.content,
            metadata: serde_json::from_str(&row.metadata)?,
            embedding: serde_json::from_str(&row.embedding)?,
            created_at: row.created_at,
        })
    }
}

impl Document {
    /// First line of the content, shortened to `max_chars`
    #[inline]
    pub fn preview(&self, max_chars: usize) -> String {
        let first_line = self.content.lines().next().unwrap_or_default();
        let mut preview: String = first_line.chars().take(max_chars).collect();
        if first_line.chars().count() > max_chars || self.content.lines().nth(1).is_some() {
            preview.push_str("...");
        }
        preview
    }
}
