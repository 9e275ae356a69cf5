//! `SQLite` system of record for chunks and their embeddings, fronted by a
//! pluggable [`VectorIndex`] for similarity reads.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::chunker::{ChunkDraft, ChunkKind, strip_import_context};
use crate::error::{IndexError, Result};
use crate::vector_index::{
    IndexPoint, ScoredId, SqliteVectorIndex, VectorIndex, decode_vector, encode_vector,
};

const DIMENSIONS_KEY: &str = "embedding_dims";

/// Open (or create) the `SQLite` database and run migrations.
///
/// Foreign keys are enabled per connection so `ON DELETE CASCADE` applies.
/// `":memory:"` opens a private in-memory database on a single connection.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or migrations fail.
pub async fn open_pool(path: &str, max_connections: u32) -> Result<SqlitePool> {
    let (url, max_connections) = if path == ":memory:" {
        ("sqlite::memory:".to_string(), 1)
    } else {
        if let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        (format!("sqlite:{path}?mode=rwc"), max_connections.max(1))
    };

    let opts = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(opts)
        .await?;

    sqlx::migrate!().run(&pool).await?;
    Ok(pool)
}

/// A chunk draft with its identity and vector, ready to persist.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub draft: ChunkDraft,
    pub embedding: Vec<f32>,
}

/// A stored chunk without its vector.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoredChunk {
    pub id: String,
    pub repository_id: String,
    pub file_path: String,
    pub content: String,
    pub chunk_type: ChunkKind,
    pub function_name: Option<String>,
    pub class_name: Option<String>,
    pub language: String,
    pub line_start: usize,
    pub line_end: usize,
    pub import_context: Vec<String>,
    pub content_hash: String,
    pub created_at: String,
}

impl StoredChunk {
    /// Source lines without the prepended imports.
    #[must_use]
    pub fn body(&self) -> &str {
        strip_import_context(&self.content, &self.import_context)
    }
}

type ChunkRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    i64,
    i64,
    String,
    String,
    String,
);

const CHUNK_COLUMNS: &str = "id, repository_id, file_path, content, chunk_type, function_name, \
                             class_name, language, line_start, line_end, import_context, \
                             content_hash, created_at";

fn chunk_from_row(row: ChunkRow) -> Result<StoredChunk> {
    let (
        id,
        repository_id,
        file_path,
        content,
        chunk_type,
        function_name,
        class_name,
        language,
        line_start,
        line_end,
        import_context,
        content_hash,
        created_at,
    ) = row;
    Ok(StoredChunk {
        id,
        repository_id,
        file_path,
        content,
        chunk_type: chunk_type.parse()?,
        function_name,
        class_name,
        language,
        line_start: usize::try_from(line_start)?,
        line_end: usize::try_from(line_end)?,
        import_context: serde_json::from_str(&import_context)?,
        content_hash,
        created_at,
    })
}

/// Deterministic chunk identity within a repository.
#[must_use]
pub fn chunk_id(repository_id: &str, draft: &ChunkDraft) -> String {
    let key = format!(
        "{repository_id}\n{}\n{}\n{}\n{}\n{}",
        draft.file_path,
        draft.kind.as_str(),
        draft.line_start,
        draft.line_end,
        draft.content_hash
    );
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Chunk persistence and repository-scoped similarity search.
#[derive(Clone)]
pub struct CodeStore {
    pool: SqlitePool,
    index: Arc<dyn VectorIndex>,
    dimensions: usize,
}

impl std::fmt::Debug for CodeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeStore")
            .field("index", &self.index.name())
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl CodeStore {
    /// Store using the exact `SQLite` scan as its vector index.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] if the database was created for a
    /// different embedding dimensionality.
    pub async fn new(pool: SqlitePool, dimensions: usize) -> Result<Self> {
        let index = Arc::new(SqliteVectorIndex::new(pool.clone()));
        Self::with_index(pool, index, dimensions).await
    }

    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] on a dimensionality conflict, or
    /// an error if the vector index cannot be prepared.
    pub async fn with_index(
        pool: SqlitePool,
        index: Arc<dyn VectorIndex>,
        dimensions: usize,
    ) -> Result<Self> {
        let store = Self {
            pool,
            index,
            dimensions,
        };
        store.ensure_dimensions().await?;
        store.index.ensure_ready(dimensions).await?;
        tracing::debug!(index = store.index.name(), dimensions, "code store ready");
        Ok(store)
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn ensure_dimensions(&self) -> Result<()> {
        let stored: Option<(String,)> =
            sqlx::query_as("SELECT value FROM index_meta WHERE key = ?")
                .bind(DIMENSIONS_KEY)
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            Some((value,)) => {
                let expected: usize = value.parse().map_err(|_| {
                    IndexError::Other(format!("corrupt {DIMENSIONS_KEY} value: {value}"))
                })?;
                if expected != self.dimensions {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: self.dimensions,
                    });
                }
            }
            None => {
                sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                    .bind(DIMENSIONS_KEY)
                    .bind(self.dimensions.to_string())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }

    /// Upsert chunks of one repository, tagging them with `run_id`.
    ///
    /// Each row is written independently; on failure rows written before the
    /// failing one stay stored.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] before writing anything if a vector
    /// has the wrong length, and [`IndexError::StoreWrite`] naming the first chunk
    /// that could not be persisted.
    pub async fn upsert_chunks(
        &self,
        repository_id: &str,
        run_id: &str,
        chunks: &[EmbeddedChunk],
    ) -> Result<usize> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != self.dimensions) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: bad.embedding.len(),
            });
        }

        for chunk in chunks {
            self.write_chunk(repository_id, run_id, chunk)
                .await
                .map_err(|e| IndexError::StoreWrite {
                    chunk_id: chunk.id.clone(),
                    reason: e.to_string(),
                })?;
        }

        let points = chunks
            .iter()
            .map(|c| IndexPoint {
                id: c.id.clone(),
                repository_id: repository_id.to_string(),
                vector: c.embedding.clone(),
            })
            .collect();
        self.index.upsert(points).await?;

        Ok(chunks.len())
    }

    async fn write_chunk(
        &self,
        repository_id: &str,
        run_id: &str,
        chunk: &EmbeddedChunk,
    ) -> Result<()> {
        let draft = &chunk.draft;
        let imports = serde_json::to_string(&draft.import_context)?;
        sqlx::query(
            "INSERT INTO code_chunks \
             (id, repository_id, file_path, content, chunk_type, function_name, class_name, \
              language, line_start, line_end, import_context, content_hash, embedding, run_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             content = excluded.content, function_name = excluded.function_name, \
             class_name = excluded.class_name, language = excluded.language, \
             import_context = excluded.import_context, embedding = excluded.embedding, \
             run_id = excluded.run_id",
        )
        .bind(&chunk.id)
        .bind(repository_id)
        .bind(&draft.file_path)
        .bind(&draft.content)
        .bind(draft.kind.as_str())
        .bind(draft.function_name.as_deref())
        .bind(draft.class_name.as_deref())
        .bind(draft.language.id())
        .bind(i64::try_from(draft.line_start)?)
        .bind(i64::try_from(draft.line_end)?)
        .bind(imports)
        .bind(&draft.content_hash)
        .bind(encode_vector(&chunk.embedding))
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stored vectors for those of `ids` that already exist in the repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn existing_embeddings(
        &self,
        repository_id: &str,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, embedding FROM code_chunks WHERE repository_id = ? AND id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, (String, Vec<u8>)>(&sql).bind(repository_id);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut out = HashMap::with_capacity(rows.len());
        for (id, blob) in rows {
            let vector = decode_vector(&blob)?;
            if vector.len() == self.dimensions {
                out.insert(id, vector);
            }
        }
        Ok(out)
    }

    /// Delete rows of the repository not written by `run_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` or the vector index fails.
    pub async fn prune_stale(&self, repository_id: &str, run_id: &str) -> Result<usize> {
        let stale: Vec<(String,)> =
            sqlx::query_as("SELECT id FROM code_chunks WHERE repository_id = ? AND run_id <> ?")
                .bind(repository_id)
                .bind(run_id)
                .fetch_all(&self.pool)
                .await?;
        if stale.is_empty() {
            return Ok(0);
        }

        sqlx::query("DELETE FROM code_chunks WHERE repository_id = ? AND run_id <> ?")
            .bind(repository_id)
            .bind(run_id)
            .execute(&self.pool)
            .await?;

        let ids: Vec<String> = stale.into_iter().map(|(id,)| id).collect();
        let removed = ids.len();
        self.index.delete(ids).await?;
        Ok(removed)
    }

    /// Delete every chunk of the repository.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` or the vector index fails.
    pub async fn delete_repository_chunks(&self, repository_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM code_chunks WHERE repository_id = ?")
            .bind(repository_id)
            .execute(&self.pool)
            .await?;
        self.index.delete_repository(repository_id).await?;
        Ok(usize::try_from(result.rows_affected())?)
    }

    /// Number of stored chunks, for reconciliation against an index run.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn chunk_count(&self, repository_id: &str) -> Result<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM code_chunks WHERE repository_id = ?")
                .bind(repository_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(usize::try_from(count)?)
    }

    /// Chunks of `repository_id` ranked by cosine similarity to `query`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::DimensionMismatch`] for a query of the wrong length,
    /// or an error if the index or `SQLite` fails.
    pub async fn search(
        &self,
        repository_id: &str,
        query: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<(StoredChunk, f32)>> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            });
        }
        let scored = self.index.search(repository_id, query, limit).await?;
        self.hydrate(repository_id, scored).await
    }

    async fn hydrate(
        &self,
        repository_id: &str,
        scored: Vec<ScoredId>,
    ) -> Result<Vec<(StoredChunk, f32)>> {
        if scored.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; scored.len()].join(", ");
        let sql = format!(
            "SELECT {CHUNK_COLUMNS} FROM code_chunks \
             WHERE repository_id = ? AND id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, ChunkRow>(&sql).bind(repository_id);
        for s in &scored {
            query = query.bind(&s.id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut by_id = HashMap::with_capacity(rows.len());
        for row in rows {
            let chunk = chunk_from_row(row)?;
            by_id.insert(chunk.id.clone(), chunk);
        }

        Ok(scored
            .into_iter()
            .filter_map(|s| by_id.remove(&s.id).map(|chunk| (chunk, s.score)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Lang;
    use crate::repository::RepositoryRegistry;

    fn draft(path: &str, line: usize, body: &str) -> ChunkDraft {
        ChunkDraft {
            file_path: path.to_string(),
            language: Lang::Python,
            kind: ChunkKind::Function,
            function_name: Some(format!("f{line}")),
            class_name: None,
            line_start: line,
            line_end: line + 1,
            import_context: vec!["import os".to_string()],
            content: format!("import os\n\n{body}"),
            content_hash: crate::chunker::blake3_hex(&format!("import os\n\n{body}")),
        }
    }

    fn embedded(repo: &str, d: ChunkDraft, v: Vec<f32>) -> EmbeddedChunk {
        EmbeddedChunk {
            id: chunk_id(repo, &d),
            draft: d,
            embedding: v,
        }
    }

    async fn setup() -> (CodeStore, RepositoryRegistry) {
        let pool = open_pool(":memory:", 1).await.unwrap();
        let store = CodeStore::new(pool.clone(), 3).await.unwrap();
        (store, RepositoryRegistry::new(pool))
    }

    #[tokio::test]
    async fn wal_journal_mode_enabled_on_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.db");
        let pool = open_pool(path.to_str().unwrap(), 2).await.unwrap();
        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[tokio::test]
    async fn dimension_mismatch_on_reopen() {
        let pool = open_pool(":memory:", 1).await.unwrap();
        CodeStore::new(pool.clone(), 3).await.unwrap();
        let err = CodeStore::new(pool, 4).await.unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimensions() {
        let (store, reg) = setup().await;
        let repo = reg.register("https://e.com/r", "r", Some("/r")).await.unwrap();
        let chunk = embedded(&repo.id, draft("a.py", 0, "def a(): pass"), vec![1.0, 0.0]);
        let err = store
            .upsert_chunks(&repo.id, "run", &[chunk])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(store.chunk_count(&repo.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn search_is_scoped_and_ranked() {
        let (store, reg) = setup().await;
        let a = reg.register("https://e.com/a", "a", Some("/a")).await.unwrap();
        let b = reg.register("https://e.com/b", "b", Some("/b")).await.unwrap();

        store
            .upsert_chunks(
                &a.id,
                "run-a",
                &[
                    embedded(&a.id, draft("x.py", 0, "def x(): pass"), vec![1.0, 0.0, 0.0]),
                    embedded(&a.id, draft("y.py", 0, "def y(): pass"), vec![0.6, 0.8, 0.0]),
                    embedded(&a.id, draft("z.py", 0, "def z(): pass"), vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        store
            .upsert_chunks(
                &b.id,
                "run-b",
                &[embedded(
                    &b.id,
                    draft("x.py", 0, "def x(): pass"),
                    vec![1.0, 0.0, 0.0],
                )],
            )
            .await
            .unwrap();

        let hits = store.search(&a.id, vec![1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.iter().all(|(c, _)| c.repository_id == a.id));
        assert_eq!(hits[0].0.file_path, "x.py");
        assert_eq!(hits[1].0.file_path, "y.py");
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(hits[0].0.import_context, vec!["import os"]);

        let limited = store.search(&a.id, vec![1.0, 0.0, 0.0], 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn upsert_same_identity_does_not_duplicate() {
        let (store, reg) = setup().await;
        let repo = reg.register("https://e.com/r", "r", Some("/r")).await.unwrap();
        let chunk = embedded(&repo.id, draft("a.py", 0, "def a(): pass"), vec![1.0, 0.0, 0.0]);

        store
            .upsert_chunks(&repo.id, "run-1", std::slice::from_ref(&chunk))
            .await
            .unwrap();
        store.upsert_chunks(&repo.id, "run-2", &[chunk]).await.unwrap();
        assert_eq!(store.chunk_count(&repo.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_refreshes_names_of_an_existing_chunk() {
        let (store, reg) = setup().await;
        let repo = reg.register("https://e.com/r", "r", Some("/r")).await.unwrap();
        let before = embedded(&repo.id, draft("a.py", 0, "def a(): pass"), vec![1.0, 0.0, 0.0]);
        let mut renamed = draft("a.py", 0, "def a(): pass");
        renamed.class_name = Some("Outer".to_string());
        renamed.function_name = Some("a".to_string());
        let after = embedded(&repo.id, renamed, vec![1.0, 0.0, 0.0]);
        assert_eq!(before.id, after.id);

        store.upsert_chunks(&repo.id, "run-1", &[before]).await.unwrap();
        store.upsert_chunks(&repo.id, "run-2", &[after]).await.unwrap();

        let hits = store.search(&repo.id, vec![1.0, 0.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.class_name.as_deref(), Some("Outer"));
        assert_eq!(hits[0].0.function_name.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn prune_stale_keeps_current_run() {
        let (store, reg) = setup().await;
        let repo = reg.register("https://e.com/r", "r", Some("/r")).await.unwrap();
        let old = embedded(&repo.id, draft("old.py", 0, "def o(): pass"), vec![1.0, 0.0, 0.0]);
        let new = embedded(&repo.id, draft("new.py", 0, "def n(): pass"), vec![0.0, 1.0, 0.0]);

        store.upsert_chunks(&repo.id, "run-1", &[old]).await.unwrap();
        store.upsert_chunks(&repo.id, "run-2", &[new]).await.unwrap();

        assert_eq!(store.prune_stale(&repo.id, "run-2").await.unwrap(), 1);
        let hits = store.search(&repo.id, vec![1.0, 1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.file_path, "new.py");
    }

    #[tokio::test]
    async fn existing_embeddings_returns_known_ids_only() {
        let (store, reg) = setup().await;
        let repo = reg.register("https://e.com/r", "r", Some("/r")).await.unwrap();
        let chunk = embedded(&repo.id, draft("a.py", 0, "def a(): pass"), vec![0.0, 0.0, 1.0]);
        let id = chunk.id.clone();
        store.upsert_chunks(&repo.id, "run", &[chunk]).await.unwrap();

        let found = store
            .existing_embeddings(&repo.id, &[id.clone(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&id], vec![0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn deleting_repository_cascades_chunks() {
        let (store, reg) = setup().await;
        let repo = reg.register("https://e.com/r", "r", Some("/r")).await.unwrap();
        let chunk = embedded(&repo.id, draft("a.py", 0, "def a(): pass"), vec![1.0, 0.0, 0.0]);
        store.upsert_chunks(&repo.id, "run", &[chunk]).await.unwrap();

        reg.delete(&repo.id).await.unwrap();
        assert_eq!(store.chunk_count(&repo.id).await.unwrap(), 0);
    }

    #[test]
    fn chunk_id_is_deterministic_and_scoped() {
        let d = draft("a.py", 3, "def a(): pass");
        assert_eq!(chunk_id("r1", &d), chunk_id("r1", &d));
        assert_ne!(chunk_id("r1", &d), chunk_id("r2", &d));
        let mut moved = d.clone();
        moved.line_start = 4;
        moved.line_end = 5;
        assert_ne!(chunk_id("r1", &d), chunk_id("r1", &moved));
        let mut as_class = d.clone();
        as_class.kind = ChunkKind::Class;
        assert_ne!(chunk_id("r1", &d), chunk_id("r1", &as_class));
    }
}
