//! Embedding provider abstraction and backend implementations.
//!
//! Every backend turns an ordered list of texts into an equally ordered list of
//! fixed-dimensionality vectors with a single request.

pub mod any;
pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub(crate) mod retry;

pub use error::EmbedError;
pub use provider::EmbeddingProvider;
