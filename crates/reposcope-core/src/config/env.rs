use std::path::PathBuf;

use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_embedding();
        self.apply_env_overrides_index();
        self.apply_env_overrides_store();
    }

    fn apply_env_overrides_embedding(&mut self) {
        if let Ok(v) = std::env::var("REPOSCOPE_EMBEDDING_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid REPOSCOPE_EMBEDDING_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOSCOPE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_EMBEDDING_DIMENSIONS")
            && let Ok(dims) = v.parse::<usize>()
        {
            self.embedding.dimensions = dims;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_EMBEDDING_MAX_RETRIES")
            && let Ok(retries) = v.parse::<u32>()
        {
            self.embedding.max_retries = retries;
        }
    }

    fn apply_env_overrides_index(&mut self) {
        if let Ok(v) = std::env::var("REPOSCOPE_INDEX_BATCH_SIZE")
            && let Ok(size) = v.parse::<usize>()
        {
            self.index.batch_size = size;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_INDEX_BATCH_DELAY_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            self.index.batch_delay_ms = ms;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_INDEX_BATCH_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.batch_concurrency = n;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_INDEX_CHUNK_WORKERS")
            && let Ok(n) = v.parse::<usize>()
        {
            self.index.chunk_workers = n;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_INDEX_EXCLUDED_DIRS") {
            self.index.extra_excluded_dirs = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("REPOSCOPE_ACQUIRE_WORK_DIR") {
            self.acquire.work_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("REPOSCOPE_ACQUIRE_KEEP_CHECKOUT")
            && let Ok(keep) = v.parse::<bool>()
        {
            self.acquire.keep_checkout = keep;
        }
    }

    fn apply_env_overrides_store(&mut self) {
        if let Ok(v) = std::env::var("REPOSCOPE_SQLITE_PATH") {
            self.store.sqlite_path = v;
        }
        if let Ok(v) = std::env::var("REPOSCOPE_VECTOR_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.store.vector_backend = backend;
            } else {
                tracing::warn!("ignoring invalid REPOSCOPE_VECTOR_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("REPOSCOPE_QDRANT_URL") {
            self.store.qdrant_url = Some(v);
        }
        if let Ok(v) = std::env::var("REPOSCOPE_SEARCH_MAX_LIMIT")
            && let Ok(limit) = v.parse::<usize>()
        {
            self.search.max_limit = limit;
        }
    }
}
