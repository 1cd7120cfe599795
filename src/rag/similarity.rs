use tracing::warn;

use crate::database::{Document, SimilarityMatch};
use crate::{RagError, Result};

fn norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Every component must be a finite number
#[inline]
pub fn ensure_finite(embedding: &[f32]) -> Result<()> {
    match embedding.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(RagError::EmbeddingFailure(format!(
            "Embedding component {index} is not a finite number ({})",
            embedding[index]
        ))),
        None => Ok(()),
    }
}

/// Cosine similarity in double precision.
///
/// Empty, zero-length or mismatched vectors have no defined similarity and
/// yield [`RagError::SimilarityUndefined`] instead of NaN.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64> {
    similarity_with_norm(a, norm(a), b)
}

fn similarity_with_norm(a: &[f32], a_norm: f64, b: &[f32]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(RagError::SimilarityUndefined(format!(
            "vector lengths differ ({} vs {})",
            a.len(),
            b.len()
        )));
    }

    let b_norm = norm(b);
    if !a_norm.is_finite() || !b_norm.is_finite() {
        return Err(RagError::SimilarityUndefined(
            "vector has non-finite components".to_string(),
        ));
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return Err(RagError::SimilarityUndefined(
            "zero-magnitude vector".to_string(),
        ));
    }

    let dot: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum();

    Ok((dot / (a_norm * b_norm)).clamp(-1.0, 1.0))
}

/// Score `documents` against `query`, keep those at or above `threshold`,
/// best first, at most `limit`.
///
/// The sort is stable, so equal scores keep the order `documents` came in.
/// Documents whose similarity is undefined are logged and left out.
#[inline]
pub fn rank_by_similarity<I>(
    query: &[f32],
    documents: I,
    threshold: f64,
    limit: usize,
) -> Vec<SimilarityMatch>
where
    I: IntoIterator<Item = Document>,
{
    let query_norm = norm(query);
    if query_norm == 0.0 {
        warn!("Query embedding has zero magnitude; no document can match");
        return Vec::new();
    }

    let mut matches: Vec<SimilarityMatch> = documents
        .into_iter()
        .filter_map(
            |document| match similarity_with_norm(query, query_norm, &document.embedding) {
                Ok(similarity) => Some(SimilarityMatch {
                    document,
                    similarity,
                }),
                Err(e) => {
                    warn!("Skipping document {}: {}", document.id, e);
                    None
                }
            },
        )
        .filter(|m| m.similarity >= threshold)
        .collect();

    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(limit);
    matches
}
