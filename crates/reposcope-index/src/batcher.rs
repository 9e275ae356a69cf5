//! Batched embedding with bounded retry, inter-batch delay, and optional
//! bounded concurrency.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use reposcope_embed::{EmbedError, EmbeddingProvider};
use tokio_util::sync::CancellationToken;

use crate::chunker::ChunkDraft;
use crate::error::{IndexError, Result, Stage};
use crate::store::EmbeddedChunk;

const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Batcher configuration.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Maximum inputs per embedding request (default: 100).
    pub batch_size: usize,
    /// Pause before every batch after the first (default: 100ms).
    pub delay: Duration,
    /// Batches in flight at once (default: 1).
    pub concurrency: usize,
    /// Retries of a transient batch failure (default: 2).
    pub retries: u32,
    /// First retry wait; doubles per attempt (default: 500ms).
    pub retry_backoff: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            delay: Duration::from_millis(100),
            concurrency: 1,
            retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// A chunk with its identity, awaiting a vector.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub id: String,
    pub draft: ChunkDraft,
}

/// Outcome of a completed batcher run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub batches: usize,
    pub embedded: usize,
}

fn retry_wait(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(MAX_RETRY_BACKOFF)
}

pub struct EmbeddingBatcher<P> {
    provider: Arc<P>,
    config: BatcherConfig,
    dimensions: usize,
}

impl<P: EmbeddingProvider> EmbeddingBatcher<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: BatcherConfig, dimensions: usize) -> Self {
        Self {
            provider,
            config,
            dimensions,
        }
    }

    #[must_use]
    pub fn batch_count(&self, chunks: usize) -> usize {
        chunks.div_ceil(self.config.batch_size.max(1))
    }

    /// Embed `chunks` batch by batch, handing every completed batch to
    /// `on_batch` before the next one starts (or, with concurrency, as they
    /// complete).
    ///
    /// After the first failure no further batch is started; batches already in
    /// flight finish and are still handed over. A chunk is never emitted without
    /// a vector of the configured dimensionality.
    ///
    /// # Errors
    ///
    /// Returns the first failure: [`IndexError::EmbeddingBatch`] after retries
    /// are exhausted, [`IndexError::DimensionMismatch`] for a wrongly sized vector,
    /// [`IndexError::Cancelled`] when `cancel` fires, or whatever `on_batch`
    /// returned.
    pub async fn run<F, Fut>(
        &self,
        chunks: Vec<PendingChunk>,
        cancel: &CancellationToken,
        mut on_batch: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(usize, Vec<EmbeddedChunk>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let size = self.config.batch_size.max(1);
        let total = self.batch_count(chunks.len());
        if total == 0 {
            return Ok(BatchSummary::default());
        }

        let mut batches: Vec<Vec<PendingChunk>> = Vec::with_capacity(total);
        let mut rest = chunks.into_iter().peekable();
        while rest.peek().is_some() {
            batches.push(rest.by_ref().take(size).collect());
        }

        tracing::info!(
            chunks = batches.iter().map(Vec::len).sum::<usize>(),
            batches = total,
            concurrency = self.config.concurrency,
            "embedding started"
        );

        let failed = AtomicBool::new(false);
        let mut stream = futures::stream::iter(batches.into_iter().enumerate())
            .map(|(i, batch)| self.embed_one(i + 1, total, batch, cancel, &failed))
            .buffer_unordered(self.config.concurrency.max(1));

        let mut summary = BatchSummary::default();
        let mut first_error: Option<IndexError> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(Some((number, embedded))) => {
                    let count = embedded.len();
                    if let Err(e) = on_batch(number, embedded).await {
                        failed.store(true, Ordering::SeqCst);
                        first_error.get_or_insert(e);
                        continue;
                    }
                    summary.batches += 1;
                    summary.embedded += count;
                    tracing::info!(
                        progress = format_args!("{number}/{total}"),
                        chunks = count,
                        "embedding batch stored"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    failed.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn embed_one(
        &self,
        number: usize,
        total: usize,
        batch: Vec<PendingChunk>,
        cancel: &CancellationToken,
        failed: &AtomicBool,
    ) -> Result<Option<(usize, Vec<EmbeddedChunk>)>> {
        if number > 1 && !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }
        if failed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        if cancel.is_cancelled() {
            return Err(IndexError::Cancelled {
                stage: Stage::Embed,
            });
        }

        let texts: Vec<String> = batch.iter().map(|c| c.draft.content.clone()).collect();
        let vectors = self.embed_with_retry(number, total, &texts).await?;

        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.len(),
            });
        }

        let embedded = batch
            .into_iter()
            .zip(vectors)
            .map(|(pending, embedding)| EmbeddedChunk {
                id: pending.id,
                draft: pending.draft,
                embedding,
            })
            .collect();
        Ok(Some((number, embedded)))
    }

    /// Rate limits the provider already retried are final; other transient
    /// errors get the batch-level budget.
    fn is_retryable(&self, e: &EmbedError) -> bool {
        if matches!(e, EmbedError::RateLimited) && self.provider.retries_rate_limits() {
            return false;
        }
        e.is_transient()
    }

    async fn embed_with_retry(
        &self,
        number: usize,
        total: usize,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            match self.provider.embed_batch(texts).await {
                Ok(vectors) if vectors.len() == texts.len() => return Ok(vectors),
                Ok(vectors) => {
                    return Err(IndexError::EmbeddingBatch {
                        batch: number,
                        total,
                        source: EmbedError::CountMismatch {
                            provider: self.provider.name().to_owned(),
                            expected: texts.len(),
                            got: vectors.len(),
                        },
                    });
                }
                Err(e) if self.is_retryable(&e) && attempt < self.config.retries => {
                    let wait = retry_wait(self.config.retry_backoff, attempt);
                    attempt += 1;
                    tracing::warn!(
                        batch = number,
                        total,
                        attempt,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        error = %e,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(source) => {
                    tracing::error!(batch = number, total, error = %source, "embedding batch failed");
                    return Err(IndexError::EmbeddingBatch {
                        batch: number,
                        total,
                        source,
                    });
                }
            }
        }
    }
}
