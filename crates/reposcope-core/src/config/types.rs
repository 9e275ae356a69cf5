use std::num::NonZeroUsize;
use std::path::PathBuf;

use serde::Deserialize;

use crate::secret::Secret;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub acquire: AcquireConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(skip)]
    pub secrets: ResolvedSecrets,
}

/// Embedding backend selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Ollama,
}

impl ProviderKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
        }
    }
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_dimensions() -> usize {
    1536
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Attempts after a rate-limited response, inside the HTTP client.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_delay_ms() -> u64 {
    100
}

fn default_batch_concurrency() -> usize {
    1
}

fn default_batch_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_max_imports() -> usize {
    10
}

pub(crate) fn default_chunk_workers() -> usize {
    std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    /// Pipeline-level retries of a transiently failing batch.
    #[serde(default = "default_batch_retries")]
    pub batch_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_imports")]
    pub max_imports: usize,
    #[serde(default = "default_chunk_workers")]
    pub chunk_workers: usize,
    /// Directory names pruned in addition to the built-in exclusion list.
    #[serde(default)]
    pub extra_excluded_dirs: Vec<String>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            batch_concurrency: default_batch_concurrency(),
            batch_retries: default_batch_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_imports: default_max_imports(),
            chunk_workers: default_chunk_workers(),
            extra_excluded_dirs: Vec::new(),
        }
    }
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("reposcope-repos")
}

fn default_clone_depth() -> u32 {
    1
}

fn default_git_binary() -> String {
    "git".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AcquireConfig {
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
    /// Leave the clone on disk after the run instead of deleting it.
    #[serde(default)]
    pub keep_checkout: bool,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            clone_depth: default_clone_depth(),
            git_binary: default_git_binary(),
            keep_checkout: false,
        }
    }
}

/// Where vectors are ranked. Chunk rows always live in `SQLite`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    #[default]
    Sqlite,
    Qdrant,
}

fn default_sqlite_path() -> String {
    "./data/reposcope.db".into()
}

fn default_collection() -> String {
    reposcope_index::qdrant::DEFAULT_COLLECTION.into()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default)]
    pub vector_backend: VectorBackend,
    #[serde(default)]
    pub qdrant_url: Option<String>,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            vector_backend: VectorBackend::default(),
            qdrant_url: None,
            collection: default_collection(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_limit() -> usize {
    10
}

fn default_max_limit() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

/// Credentials resolved from the environment, never from the config file.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSecrets {
    pub embedding_api_key: Option<Secret>,
    pub git_token: Option<Secret>,
}
