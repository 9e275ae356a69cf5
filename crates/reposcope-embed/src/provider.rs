use std::future::Future;

use crate::error::EmbedError;

/// A remote or local model that maps text to vectors.
///
/// Implementations must return exactly one vector per input, in input order, and
/// every vector must have the same dimensionality for a given model.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts with a single request.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the response is malformed.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, EmbedError>> + Send;

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying batch request fails or returns nothing.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, EmbedError>> + Send {
        let input = vec![text.to_owned()];
        async move {
            self.embed_batch(&input)
                .await?
                .pop()
                .ok_or_else(|| EmbedError::EmptyResponse {
                    provider: self.name().to_owned(),
                })
        }
    }

    /// Model identifier; recorded alongside stored vectors.
    fn model(&self) -> &str;

    /// Whether `embed_batch` already retries rate-limited requests, so a
    /// returned `RateLimited` means that budget is spent.
    fn retries_rate_limits(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Check that a response holds one vector per input.
///
/// # Errors
///
/// Returns `EmbedError::CountMismatch` when the lengths differ.
pub(crate) fn ensure_count(provider: &str, expected: usize, got: usize) -> Result<(), EmbedError> {
    if expected == got {
        Ok(())
    } else {
        Err(EmbedError::CountMismatch {
            provider: provider.to_owned(),
            expected,
            got,
        })
    }
}
