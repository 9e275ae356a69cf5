//! Repository-scoped semantic search.

use std::sync::Arc;

use reposcope_embed::EmbeddingProvider;
use serde::Serialize;

use crate::error::{IndexError, Result};
use crate::repository::{RepositoryRegistry, normalize_source_url};
use crate::store::{CodeStore, StoredChunk};

/// Search limits.
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Used when the caller passes no limit (default: 10).
    pub default_limit: usize,
    /// Upper bound applied to every request (default: 100).
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub chunk: StoredChunk,
    /// Cosine similarity clamped into `[0, 1]`.
    pub similarity: f32,
}

/// Read-only query path: resolve repository, embed query, rank chunks.
pub struct SearchService<P> {
    registry: RepositoryRegistry,
    store: CodeStore,
    provider: Arc<P>,
    config: SearchConfig,
}

impl<P: EmbeddingProvider> SearchService<P> {
    #[must_use]
    pub fn new(
        registry: RepositoryRegistry,
        store: CodeStore,
        provider: Arc<P>,
        config: SearchConfig,
    ) -> Self {
        Self {
            registry,
            store,
            provider,
            config,
        }
    }

    /// Rank the chunks of the repository registered under `repo_url` against
    /// `query`. `None` uses the configured default limit; every limit is clamped
    /// to the configured maximum.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RepositoryNotIndexed`] for an unknown URL,
    /// [`IndexError::EmbeddingModelMismatch`] when the repository's vectors come
    /// from a different model, or an embedding/store error.
    pub async fn search(
        &self,
        repo_url: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Vec<SearchResult>> {
        let repository = self
            .registry
            .find_by_url(repo_url)
            .await?
            .ok_or_else(|| IndexError::RepositoryNotIndexed(normalize_source_url(repo_url)))?;

        if let Some(indexed) = repository.embedding_model.as_deref() {
            let dims_differ = repository
                .embedding_dims
                .is_some_and(|d| d != self.store.dimensions());
            if indexed != self.provider.model() || dims_differ {
                return Err(IndexError::EmbeddingModelMismatch {
                    repository: repository.source_url,
                    indexed: indexed.to_string(),
                    current: self.provider.model().to_string(),
                });
            }
        }

        let limit = limit
            .unwrap_or(self.config.default_limit)
            .min(self.config.max_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let vector = self.provider.embed(query).await?;
        let hits = self.store.search(&repository.id, vector, limit).await?;

        tracing::debug!(
            repository = %repository.source_url,
            limit,
            hits = hits.len(),
            "search complete"
        );

        Ok(hits
            .into_iter()
            .map(|(chunk, score)| SearchResult {
                chunk,
                similarity: score.clamp(0.0, 1.0),
            })
            .collect())
    }
}
