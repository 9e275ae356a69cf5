//! Pluggable similarity index over stored chunk embeddings.
//!
//! `SQLite` remains the system of record for chunk rows. A [`VectorIndex`] only
//! answers "which chunk ids of this repository are closest to this vector".

use std::future::Future;
use std::pin::Pin;

use futures::TryStreamExt;
use sqlx::SqlitePool;

use crate::error::{IndexError, Result};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A vector to index, tagged with its owning repository.
#[derive(Debug, Clone)]
pub struct IndexPoint {
    pub id: String,
    pub repository_id: String,
    pub vector: Vec<f32>,
}

/// A chunk id with its cosine similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

pub trait VectorIndex: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Prepare backend structures for vectors of `dimensions` length.
    fn ensure_ready(&self, dimensions: usize) -> BoxFuture<'_, Result<()>>;

    /// Index vectors whose chunk rows were already written to `SQLite`.
    fn upsert(&self, points: Vec<IndexPoint>) -> BoxFuture<'_, Result<()>>;

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<()>>;

    fn delete_repository(&self, repository_id: &str) -> BoxFuture<'_, Result<()>>;

    /// Up to `limit` ids of `repository_id`, by similarity descending then id ascending.
    fn search(
        &self,
        repository_id: &str,
        query: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredId>>>;
}

/// Cosine similarity; 0.0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sort by score descending, ties by id ascending, and keep the first `limit`.
pub(crate) fn rank(mut scored: Vec<ScoredId>, limit: usize) -> Vec<ScoredId> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(limit);
    scored
}

/// Little-endian `f32` encoding used for the `embedding` BLOB column.
pub(crate) fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(IndexError::Other(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Exact scan over the `embedding` column of one repository's rows.
#[derive(Debug, Clone)]
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn ensure_ready(&self, _dimensions: usize) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn upsert(&self, _points: Vec<IndexPoint>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn delete(&self, _ids: Vec<String>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn delete_repository(&self, _repository_id: &str) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn search(
        &self,
        repository_id: &str,
        query: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredId>>> {
        let repository_id = repository_id.to_owned();
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let mut rows = sqlx::query_as::<_, (String, Vec<u8>)>(
                "SELECT id, embedding FROM code_chunks WHERE repository_id = ?",
            )
            .bind(&repository_id)
            .fetch(&self.pool);

            let mut scored = Vec::new();
            while let Some((id, blob)) = rows.try_next().await? {
                let vector = decode_vector(&blob)?;
                scored.push(ScoredId {
                    id,
                    score: cosine_similarity(&query, &vector),
                });
            }
            Ok(rank(scored, limit))
        })
    }
}
