//! Repository indexing and repository-scoped semantic code search.
//!
//! The write path materialises a repository ([`acquire`]), walks its tree
//! ([`walker`]), splits supported files into function/class/file chunks
//! ([`chunker`]), embeds them in batches ([`batcher`]) and persists them
//! ([`store`]). [`search`] answers natural-language queries against one
//! repository at a time.

pub mod acquire;
pub mod batcher;
pub mod chunker;
pub mod error;
pub mod indexer;
pub mod languages;
pub mod qdrant;
pub mod repository;
pub mod search;
pub mod store;
pub mod vector_index;
pub mod walker;

pub use error::{IndexError, Result, Stage};
