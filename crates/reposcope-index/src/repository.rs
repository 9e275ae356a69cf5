//! Repository identity records.

use sqlx::SqlitePool;

use crate::error::Result;

/// One indexed source repository. Owns its chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    /// Normalised source URL; unique.
    pub source_url: String,
    pub display_name: String,
    /// Working tree the last run indexed; `None` when it was a temporary clone.
    pub local_path: Option<String>,
    /// Model whose vectors are stored for this repository, once indexed.
    pub embedding_model: Option<String>,
    pub embedding_dims: Option<usize>,
    pub created_at: String,
}

type RepositoryRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<i64>,
    String,
);

const SELECT_COLUMNS: &str = "SELECT id, source_url, display_name, local_path, embedding_model, \
                              embedding_dims, created_at FROM repositories";

fn from_row(row: RepositoryRow) -> Result<Repository> {
    let (id, source_url, display_name, local_path, embedding_model, dims, created_at) = row;
    Ok(Repository {
        id,
        source_url,
        display_name,
        local_path,
        embedding_model,
        embedding_dims: dims.map(usize::try_from).transpose()?,
        created_at,
    })
}

/// Canonical form of a source URL: trimmed, without trailing `/` or `.git`.
#[must_use]
pub fn normalize_source_url(url: &str) -> String {
    let mut s = url.trim().trim_end_matches('/');
    if let Some(stripped) = s.strip_suffix(".git") {
        s = stripped.trim_end_matches('/');
    }
    s.to_string()
}

/// Last path segment of a source URL, without `.git`.
#[must_use]
pub fn display_name_from_url(url: &str) -> String {
    let normalized = normalize_source_url(url);
    normalized
        .rsplit(['/', '\\', ':'])
        .find(|seg| !seg.is_empty())
        .unwrap_or(normalized.as_str())
        .to_string()
}

/// `SQLite`-backed repository table.
#[derive(Debug, Clone)]
pub struct RepositoryRegistry {
    pool: SqlitePool,
}

impl RepositoryRegistry {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a repository, or refresh `display_name` and `local_path` when the
    /// normalised URL is already registered. The id is stable across re-indexing.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn register(
        &self,
        source_url: &str,
        display_name: &str,
        local_path: Option<&str>,
    ) -> Result<Repository> {
        let source_url = normalize_source_url(source_url);
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO repositories (id, source_url, display_name, local_path) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT(source_url) DO UPDATE SET \
             display_name = excluded.display_name, local_path = excluded.local_path",
        )
        .bind(&id)
        .bind(&source_url)
        .bind(display_name)
        .bind(local_path)
        .execute(&self.pool)
        .await?;

        let row: RepositoryRow = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE source_url = ?"))
            .bind(&source_url)
            .fetch_one(&self.pool)
            .await?;
        from_row(row)
    }

    /// Record which embedding model produced this repository's vectors.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn set_embedding_model(&self, id: &str, model: &str, dims: usize) -> Result<()> {
        sqlx::query("UPDATE repositories SET embedding_model = ?, embedding_dims = ? WHERE id = ?")
            .bind(model)
            .bind(i64::try_from(dims)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn find_by_url(&self, source_url: &str) -> Result<Option<Repository>> {
        let row: Option<RepositoryRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE source_url = ?"))
                .bind(normalize_source_url(source_url))
                .fetch_optional(&self.pool)
                .await?;
        row.map(from_row).transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn get(&self, id: &str) -> Result<Option<Repository>> {
        let row: Option<RepositoryRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(from_row).transpose()
    }

    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn list(&self) -> Result<Vec<Repository>> {
        let rows: Vec<RepositoryRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY source_url"))
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Delete a repository; its chunk rows cascade. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the `SQLite` query fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM repositories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
