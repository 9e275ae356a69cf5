//! Error types for reposcope-index.

use std::fmt;
use std::num::TryFromIntError;
use std::path::PathBuf;

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Acquire,
    Walk,
    Chunk,
    Embed,
    Store,
    Search,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Walk => "walk",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Store => "store",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while indexing or searching a repository.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Cloning or registering the source failed; nothing was committed.
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// A single source file could not be read. Recoverable, file-scoped.
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tree-sitter could not produce a tree. Recoverable, file-scoped.
    #[error("parse failed: {0}")]
    Parse(String),

    /// A file without a registered grammar reached the chunker.
    #[error("unsupported language for {0}")]
    UnsupportedLanguage(String),

    /// An embedding request failed after all retries.
    #[error("embedding batch {batch}/{total} failed: {source}")]
    EmbeddingBatch {
        batch: usize,
        total: usize,
        #[source]
        source: reposcope_embed::EmbedError,
    },

    /// Persisting a chunk failed; chunks stored earlier remain valid.
    #[error("failed to store chunk {chunk_id}: {reason}")]
    StoreWrite { chunk_id: String, reason: String },

    /// No repository is registered under this source URL.
    #[error("repository not indexed: {0}")]
    RepositoryNotIndexed(String),

    /// A vector does not match the process-wide dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The repository was indexed with a different embedding model.
    #[error("repository {repository} was indexed with model {indexed}, service uses {current}")]
    EmbeddingModelMismatch {
        repository: String,
        indexed: String,
        current: String,
    },

    /// The run was cancelled before the named stage started.
    #[error("indexing cancelled before {stage} stage")]
    Cancelled { stage: Stage },

    /// IO error outside of per-file reads.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `SQLite` database error.
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Schema migration error.
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Qdrant vector index error.
    #[error("Qdrant error: {0}")]
    Qdrant(#[from] Box<qdrant_client::QdrantError>),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedding error outside of batch processing (e.g. query embedding).
    #[error("embedding error: {0}")]
    Embed(#[from] reposcope_embed::EmbedError),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// The pipeline stage this error terminates, if it is stage-specific.
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Acquisition(_) => Some(Stage::Acquire),
            Self::FileRead { .. } | Self::Parse(_) | Self::UnsupportedLanguage(_) => {
                Some(Stage::Chunk)
            }
            Self::EmbeddingBatch { .. } | Self::DimensionMismatch { .. } => Some(Stage::Embed),
            Self::StoreWrite { .. } | Self::Qdrant(_) | Self::Sqlite(_) | Self::Migration(_) => {
                Some(Stage::Store)
            }
            Self::RepositoryNotIndexed(_) | Self::EmbeddingModelMismatch { .. } => {
                Some(Stage::Search)
            }
            Self::Cancelled { stage } => Some(*stage),
            Self::Io(_)
            | Self::Json(_)
            | Self::Embed(_)
            | Self::IntConversion(_)
            | Self::Other(_) => None,
        }
    }

    /// File-scoped errors are logged and skipped rather than aborting a run.
    #[must_use]
    pub fn is_file_scoped(&self) -> bool {
        matches!(
            self,
            Self::FileRead { .. } | Self::Parse(_) | Self::UnsupportedLanguage(_)
        )
    }
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
