//! Wiring from [`Config`] to ready-to-use pipeline services.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reposcope_embed::EmbeddingProvider;
use reposcope_embed::any::AnyEmbedder;
use reposcope_embed::ollama::OllamaEmbedder;
use reposcope_embed::openai::OpenAiEmbedder;
use reposcope_index::acquire::{Acquire, GitAcquirer, GitConfig};
use reposcope_index::batcher::BatcherConfig;
use reposcope_index::chunker::ChunkerConfig;
use reposcope_index::indexer::{IndexerConfig, RepositoryIndexer};
use reposcope_index::qdrant::QdrantVectorIndex;
use reposcope_index::repository::RepositoryRegistry;
use reposcope_index::search::{SearchConfig, SearchService};
use reposcope_index::store::{CodeStore, open_pool};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ProviderKind, VectorBackend};

/// Build the embedding backend selected by `[embedding]`.
///
/// # Errors
///
/// Returns an error if the `OpenAI` backend is selected without an API key, or
/// its HTTP client cannot be constructed.
pub fn build_embedder(config: &Config) -> anyhow::Result<AnyEmbedder> {
    let embedding = &config.embedding;
    match embedding.provider {
        ProviderKind::OpenAi => {
            let api_key = config
                .secrets
                .embedding_api_key
                .as_ref()
                .context("REPOSCOPE_EMBEDDING_API_KEY is not set")?;
            let embedder = OpenAiEmbedder::new(
                api_key.expose().to_owned(),
                embedding.base_url.clone(),
                embedding.model.clone(),
            )
            .context("failed to build OpenAI embedding client")?
            .with_dimensions(embedding.dimensions)
            .with_max_retries(embedding.max_retries);
            Ok(AnyEmbedder::OpenAi(embedder))
        }
        ProviderKind::Ollama => Ok(AnyEmbedder::Ollama(OllamaEmbedder::new(
            &embedding.base_url,
            embedding.model.clone(),
        ))),
    }
}

#[must_use]
pub fn indexer_config(config: &Config) -> IndexerConfig {
    let index = &config.index;
    IndexerConfig {
        chunker: ChunkerConfig {
            max_imports: index.max_imports,
        },
        batcher: BatcherConfig {
            batch_size: index.batch_size,
            delay: Duration::from_millis(index.batch_delay_ms),
            concurrency: index.batch_concurrency,
            retries: index.batch_retries,
            retry_backoff: Duration::from_millis(index.retry_backoff_ms),
        },
        chunk_workers: index.chunk_workers,
        extra_excluded_dirs: index.extra_excluded_dirs.clone(),
    }
}

#[must_use]
pub fn git_config(config: &Config) -> GitConfig {
    GitConfig {
        git_binary: config.acquire.git_binary.clone(),
        work_dir: config.acquire.work_dir.clone(),
        clone_depth: config.acquire.clone_depth,
        keep_checkout: config.acquire.keep_checkout,
    }
}

#[must_use]
pub fn search_config(config: &Config) -> SearchConfig {
    SearchConfig {
        default_limit: config.search.default_limit,
        max_limit: config.search.max_limit,
    }
}

/// Open the `SQLite` database and attach the configured vector index.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrated, the stored
/// dimensionality conflicts with `[embedding].dimensions`, or Qdrant is
/// unreachable.
pub async fn open_store(config: &Config) -> anyhow::Result<(RepositoryRegistry, CodeStore)> {
    let pool = open_pool(&config.store.sqlite_path, config.store.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.store.sqlite_path))?;
    let dims = config.embedding.dimensions;

    let store = match config.store.vector_backend {
        VectorBackend::Sqlite => CodeStore::new(pool.clone(), dims).await?,
        VectorBackend::Qdrant => {
            let url = config
                .store
                .qdrant_url
                .as_deref()
                .context("store.qdrant_url is required for the qdrant backend")?;
            let index = QdrantVectorIndex::new(url, &config.store.collection)?;
            CodeStore::with_index(pool.clone(), Arc::new(index), dims)
                .await
                .context("failed to prepare Qdrant collection")?
        }
    };
    tracing::info!(
        path = %config.store.sqlite_path,
        backend = ?config.store.vector_backend,
        dims,
        "store ready"
    );
    Ok((RepositoryRegistry::new(pool), store))
}

/// Shared handles behind every CLI command.
pub struct Services<P> {
    pub registry: RepositoryRegistry,
    pub store: CodeStore,
    pub provider: Arc<P>,
    config: Config,
}

impl Services<AnyEmbedder> {
    /// Build everything from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder or the store cannot be constructed.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let provider = build_embedder(&config)?;
        let (registry, store) = open_store(&config).await?;
        Ok(Self::new(config, registry, store, provider))
    }
}

impl<P: EmbeddingProvider> Services<P> {
    #[must_use]
    pub fn new(config: Config, registry: RepositoryRegistry, store: CodeStore, provider: P) -> Self {
        Self {
            registry,
            store,
            provider: Arc::new(provider),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shallow-clone acquirer built from `[acquire]`.
    #[must_use]
    pub fn git_acquirer(&self) -> Arc<dyn Acquire> {
        Arc::new(GitAcquirer::new(git_config(&self.config)))
    }

    #[must_use]
    pub fn indexer(
        &self,
        acquirer: Arc<dyn Acquire>,
        cancel: CancellationToken,
    ) -> RepositoryIndexer<P> {
        RepositoryIndexer::new(
            acquirer,
            self.registry.clone(),
            self.store.clone(),
            Arc::clone(&self.provider),
            indexer_config(&self.config),
        )
        .with_cancellation(cancel)
    }

    #[must_use]
    pub fn search_service(&self) -> SearchService<P> {
        SearchService::new(
            self.registry.clone(),
            self.store.clone(),
            Arc::clone(&self.provider),
            search_config(&self.config),
        )
    }

    /// Git token from the environment, if any.
    #[must_use]
    pub fn git_token(&self) -> Option<&str> {
        self.config.secrets.git_token.as_ref().map(|s| s.expose())
    }
}
