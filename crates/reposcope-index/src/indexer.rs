//! Repository indexing orchestrator: acquire → register → walk → chunk →
//! embed and store per batch → prune.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use reposcope_embed::EmbeddingProvider;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::acquire::Acquire;
use crate::batcher::{BatcherConfig, EmbeddingBatcher, PendingChunk};
use crate::chunker::{ChunkDraft, ChunkerConfig, chunk_file};
use crate::error::{IndexError, Result, Stage};
use crate::repository::{Repository, RepositoryRegistry};
use crate::store::{CodeStore, EmbeddedChunk, chunk_id};
use crate::walker::{SourceFile, TreeWalker};

/// Ids looked up per existing-vector query.
const LOOKUP_SLICE: usize = 500;

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    pub batcher: BatcherConfig,
    /// Files parsed concurrently.
    pub chunk_workers: usize,
    pub extra_excluded_dirs: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            batcher: BatcherConfig::default(),
            chunk_workers: std::thread::available_parallelism().map_or(4, usize::from),
            extra_excluded_dirs: Vec::new(),
        }
    }
}

/// Summary of a successful indexing run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IndexReport {
    pub repository_id: String,
    pub source_url: String,
    /// Chunks stored for the repository after the run.
    pub chunk_count: usize,
    /// Distinct chunks produced by this run.
    pub chunks_expected: usize,
    pub files_scanned: usize,
    pub files_failed: usize,
    /// Chunks embedded by this run.
    pub chunks_created: usize,
    /// Chunks whose stored vector was reused.
    pub chunks_reused: usize,
    /// Rows from earlier runs no longer produced.
    pub chunks_removed: usize,
    pub batches: usize,
    pub duration_ms: u64,
}

pub struct RepositoryIndexer<P> {
    acquirer: Arc<dyn Acquire>,
    registry: RepositoryRegistry,
    store: CodeStore,
    provider: Arc<P>,
    batcher: EmbeddingBatcher<P>,
    walker: TreeWalker,
    config: IndexerConfig,
    cancel: CancellationToken,
}

impl<P: EmbeddingProvider> RepositoryIndexer<P> {
    #[must_use]
    pub fn new(
        acquirer: Arc<dyn Acquire>,
        registry: RepositoryRegistry,
        store: CodeStore,
        provider: Arc<P>,
        config: IndexerConfig,
    ) -> Self {
        let batcher = EmbeddingBatcher::new(
            Arc::clone(&provider),
            config.batcher.clone(),
            store.dimensions(),
        );
        Self {
            acquirer,
            registry,
            store,
            provider,
            batcher,
            walker: TreeWalker::new(&config.extra_excluded_dirs),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `token` to abort runs at the next checkpoint.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn checkpoint(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            tracing::warn!(%stage, "indexing cancelled");
            return Err(IndexError::Cancelled { stage });
        }
        Ok(())
    }

    /// Index the repository at `url` end to end.
    ///
    /// Chunks are stored batch by batch, so a failure leaves every batch stored
    /// before it in place; re-running is the recovery path. Rows from earlier
    /// runs are removed only after a fully successful run.
    ///
    /// # Errors
    ///
    /// Returns the first stage-fatal error; see [`IndexError::stage`].
    pub async fn index_repository(&self, url: &str, token: Option<&str>) -> Result<IndexReport> {
        let start = Instant::now();

        self.checkpoint(Stage::Acquire)?;
        let acquired = self.acquirer.acquire(url, token).await?;
        let local_path = acquired
            .checkout
            .lasting_path()
            .map(|p| p.to_string_lossy().into_owned());
        let repository = self
            .registry
            .register(
                &acquired.source_url,
                &acquired.display_name,
                local_path.as_deref(),
            )
            .await?;
        tracing::info!(
            repository = %repository.source_url,
            id = %repository.id,
            path = %acquired.checkout.path().display(),
            temporary = acquired.checkout.is_temporary(),
            "repository acquired"
        );
        self.prepare_model(&repository).await?;

        self.checkpoint(Stage::Walk)?;
        let root = acquired.checkout.path().to_path_buf();
        let walker = self.walker.clone();
        let files = tokio::task::spawn_blocking(move || walker.walk(&root))
            .await
            .map_err(|e| IndexError::Other(format!("walk task failed: {e}")))??;
        tracing::info!(files = files.len(), "walk complete");

        let mut report = IndexReport {
            repository_id: repository.id.clone(),
            source_url: repository.source_url.clone(),
            files_scanned: files.len(),
            ..IndexReport::default()
        };

        self.checkpoint(Stage::Chunk)?;
        let (drafts, files_failed) = self.chunk_files(files).await;
        report.files_failed = files_failed;
        let pending = dedupe(&repository.id, drafts);
        report.chunks_expected = pending.len();
        tracing::info!(
            chunks = pending.len(),
            files_failed,
            "chunking complete"
        );

        self.checkpoint(Stage::Embed)?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let (reused, to_embed) = self.split_reusable(&repository.id, pending).await?;
        report.chunks_reused = reused.len();
        for slice in reused.chunks(self.config.batcher.batch_size.max(1)) {
            self.store
                .upsert_chunks(&repository.id, &run_id, slice)
                .await?;
        }

        let store = &self.store;
        let repository_id = repository.id.as_str();
        let run = run_id.as_str();
        let summary = self
            .batcher
            .run(to_embed, &self.cancel, |_, chunks| async move {
                store.upsert_chunks(repository_id, run, &chunks).await?;
                Ok(())
            })
            .await?;
        report.batches = summary.batches;
        report.chunks_created = summary.embedded;

        report.chunks_removed = self.store.prune_stale(&repository.id, &run_id).await?;
        report.chunk_count = self.store.chunk_count(&repository.id).await?;
        if report.chunk_count != report.chunks_expected {
            tracing::warn!(
                stored = report.chunk_count,
                expected = report.chunks_expected,
                "stored chunk count does not match this run"
            );
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            repository = %report.source_url,
            chunks = report.chunk_count,
            created = report.chunks_created,
            reused = report.chunks_reused,
            removed = report.chunks_removed,
            duration_ms = report.duration_ms,
            "indexing complete"
        );
        Ok(report)
    }

    /// Drop vectors produced by a different model, then record the current one.
    async fn prepare_model(&self, repository: &Repository) -> Result<()> {
        let model = self.provider.model();
        let dims = self.store.dimensions();
        let stale = repository
            .embedding_model
            .as_deref()
            .is_some_and(|m| m != model)
            || repository.embedding_dims.is_some_and(|d| d != dims);
        if stale {
            let dropped = self.store.delete_repository_chunks(&repository.id).await?;
            tracing::warn!(
                previous = repository.embedding_model.as_deref().unwrap_or_default(),
                current = model,
                dropped,
                "embedding model changed, dropped existing chunks"
            );
        }
        self.registry
            .set_embedding_model(&repository.id, model, dims)
            .await
    }

    /// Read and chunk files on the blocking pool, at most `chunk_workers` at a
    /// time, keeping walk order. File-scoped failures are logged and counted.
    async fn chunk_files(&self, files: Vec<SourceFile>) -> (Vec<ChunkDraft>, usize) {
        let workers = self.config.chunk_workers.max(1);
        let config = &self.config.chunker;

        let results: Vec<(String, Result<Vec<ChunkDraft>>)> = futures::stream::iter(files)
            .map(|file| async move {
                let rel_path = file.rel_path.clone();
                (rel_path, chunk_one(file, config.clone()).await)
            })
            .buffered(workers)
            .collect()
            .await;

        let mut drafts = Vec::new();
        let mut failed = 0usize;
        for (path, result) in results {
            match result {
                Ok(chunks) => {
                    tracing::debug!(file = %path, chunks = chunks.len(), "chunked");
                    drafts.extend(chunks);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(file = %path, error = %e, "skipping file");
                }
            }
        }
        (drafts, failed)
    }

    /// Split chunks into those with a stored vector and those needing one.
    async fn split_reusable(
        &self,
        repository_id: &str,
        pending: Vec<PendingChunk>,
    ) -> Result<(Vec<EmbeddedChunk>, Vec<PendingChunk>)> {
        let ids: Vec<String> = pending.iter().map(|p| p.id.clone()).collect();
        let mut known = std::collections::HashMap::new();
        for slice in ids.chunks(LOOKUP_SLICE) {
            known.extend(self.store.existing_embeddings(repository_id, slice).await?);
        }

        let mut reused = Vec::new();
        let mut to_embed = Vec::new();
        for chunk in pending {
            match known.remove(&chunk.id) {
                Some(embedding) => reused.push(EmbeddedChunk {
                    id: chunk.id,
                    draft: chunk.draft,
                    embedding,
                }),
                None => to_embed.push(chunk),
            }
        }
        Ok((reused, to_embed))
    }
}

async fn chunk_one(file: SourceFile, config: ChunkerConfig) -> Result<Vec<ChunkDraft>> {
    let source = tokio::fs::read_to_string(&file.abs_path)
        .await
        .map_err(|source| IndexError::FileRead {
            path: file.abs_path.clone(),
            source,
        })?;
    tokio::task::spawn_blocking(move || chunk_file(&source, &file.rel_path, file.lang, &config))
        .await
        .map_err(|e| IndexError::Parse(format!("chunk task failed: {e}")))?
}

/// Assign identities, keeping the first draft for each.
fn dedupe(repository_id: &str, drafts: Vec<ChunkDraft>) -> Vec<PendingChunk> {
    let mut seen = HashSet::with_capacity(drafts.len());
    drafts
        .into_iter()
        .filter_map(|draft| {
            let id = chunk_id(repository_id, &draft);
            seen.insert(id.clone())
                .then_some(PendingChunk { id, draft })
        })
        .collect()
}
