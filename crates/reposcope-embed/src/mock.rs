//! Test-only deterministic embedder.
//!
//! Vectors are hashed bags of lowercase alphanumeric tokens, so texts sharing
//! vocabulary score higher under cosine similarity than unrelated texts.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::EmbedError;
use crate::provider::EmbeddingProvider;

#[derive(Debug, Clone)]
pub struct MockEmbedder {
    pub dimensions: usize,
    pub model: String,
    /// 1-based call number that fails; every later call fails too.
    pub fail_from_call: Option<usize>,
    /// Number of leading calls that fail with a transient rate-limit error.
    pub transient_failures: usize,
    /// Milliseconds to sleep before returning.
    pub delay_ms: u64,
    /// Reported as if rate limits were already retried inside `embed_batch`.
    pub retries_rate_limits: bool,
    calls: Arc<AtomicUsize>,
    inputs: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model: "mock-embedding".into(),
            fail_from_call: None,
            transient_failures: 0,
            delay_ms: 0,
            retries_rate_limits: false,
            calls: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn failing_from_call(mut self, call: usize) -> Self {
        self.fail_from_call = Some(call);
        self
    }

    #[must_use]
    pub fn rate_limited_for(mut self, calls: usize) -> Self {
        self.transient_failures = calls;
        self
    }

    #[must_use]
    pub fn retrying_rate_limits(mut self) -> Self {
        self.retries_rate_limits = true;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Number of `embed_batch` calls made so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of texts embedded successfully so far.
    #[must_use]
    pub fn inputs(&self) -> usize {
        self.inputs.load(Ordering::SeqCst)
    }

    /// The vector this embedder produces for `text`.
    #[must_use]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dimensions];
        if self.dimensions == 0 {
            return v;
        }
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let lower = token.to_lowercase();
            #[allow(clippy::cast_possible_truncation)]
            let slot = (fnv1a(lower.as_bytes()) % self.dimensions as u64) as usize;
            v[slot] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl EmbeddingProvider for MockEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if call <= self.transient_failures {
            return Err(EmbedError::RateLimited);
        }
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Err(EmbedError::Other(format!("mock embedding failure on call {call}")));
        }
        self.inputs.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }

    fn retries_rate_limits(&self) -> bool {
        self.retries_rate_limits
    }
}
