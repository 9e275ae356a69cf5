mod env;
mod types;


pub use types::*;

use std::path::Path;

use anyhow::{Context, bail};

use crate::secret::Secret;

/// Upper bound on texts per embedding request.
pub const MAX_BATCH_SIZE: usize = 2048;

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.resolve_secrets();
        Ok(config)
    }

    /// Pick up credentials from the environment.
    pub fn resolve_secrets(&mut self) {
        if let Some(key) = Secret::from_env("REPOSCOPE_EMBEDDING_API_KEY") {
            self.secrets.embedding_api_key = Some(key);
        }
        if let Some(token) = Secret::from_env("REPOSCOPE_GIT_TOKEN") {
            self.secrets.git_token = Some(token);
        }
    }

    /// Reject settings the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be greater than zero");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.index.batch_size == 0 || self.index.batch_size > MAX_BATCH_SIZE {
            bail!(
                "index.batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.index.batch_size
            );
        }
        if self.index.batch_concurrency == 0 {
            bail!("index.batch_concurrency must be greater than zero");
        }
        if self.index.chunk_workers == 0 {
            bail!("index.chunk_workers must be greater than zero");
        }
        if self.acquire.clone_depth == 0 {
            bail!("acquire.clone_depth must be greater than zero");
        }
        if self.store.max_connections == 0 {
            bail!("store.max_connections must be greater than zero");
        }
        if self.search.default_limit > self.search.max_limit {
            bail!(
                "search.default_limit ({}) exceeds search.max_limit ({})",
                self.search.default_limit,
                self.search.max_limit
            );
        }
        if self.store.vector_backend == VectorBackend::Qdrant
            && self
                .store
                .qdrant_url
                .as_deref()
                .is_none_or(|u| u.trim().is_empty())
        {
            bail!("store.qdrant_url is required when store.vector_backend = \"qdrant\"");
        }
        Ok(())
    }
}
