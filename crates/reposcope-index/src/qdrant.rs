//! `Qdrant` HNSW backend for [`VectorIndex`].

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList, ScoredPoint,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};

use crate::error::{IndexError, Result};
use crate::vector_index::{BoxFuture, IndexPoint, ScoredId, VectorIndex, rank};

pub const DEFAULT_COLLECTION: &str = "reposcope_code_chunks";

const REPOSITORY_FIELD: &str = "repository_id";

/// Cosine collection with a keyword payload index on `repository_id`.
#[derive(Clone)]
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection: String,
}

impl std::fmt::Debug for QdrantVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorIndex")
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

fn qdrant_err(e: qdrant_client::QdrantError) -> IndexError {
    IndexError::Qdrant(Box::new(e))
}

fn repository_filter(repository_id: &str) -> Filter {
    Filter::must([Condition::matches(
        REPOSITORY_FIELD,
        repository_id.to_string(),
    )])
}

fn point_id_string(point: &ScoredPoint) -> Option<String> {
    match point.id.as_ref()?.point_id_options.as_ref()? {
        PointIdOptions::Uuid(id) => Some(id.clone()),
        PointIdOptions::Num(n) => Some(n.to_string()),
    }
}

impl QdrantVectorIndex {
    /// # Errors
    ///
    /// Returns an error if the `Qdrant` client cannot be created.
    pub fn new(url: &str, collection: &str) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(qdrant_err)?;
        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl VectorIndex for QdrantVectorIndex {
    fn name(&self) -> &'static str {
        "qdrant"
    }

    fn ensure_ready(&self, dimensions: usize) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self
                .client
                .collection_exists(&self.collection)
                .await
                .map_err(qdrant_err)?
            {
                return Ok(());
            }

            let size = u64::try_from(dimensions)?;
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(size, Distance::Cosine)),
                )
                .await
                .map_err(qdrant_err)?;

            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    REPOSITORY_FIELD,
                    FieldType::Keyword,
                ))
                .await
                .map_err(qdrant_err)?;

            tracing::info!(collection = %self.collection, dimensions, "created Qdrant collection");
            Ok(())
        })
    }

    fn upsert(&self, points: Vec<IndexPoint>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if points.is_empty() {
                return Ok(());
            }
            let mut structs = Vec::with_capacity(points.len());
            for point in points {
                let payload = HashMap::from([(
                    REPOSITORY_FIELD.to_string(),
                    Value::from(point.repository_id),
                )]);
                structs.push(PointStruct::new(point.id, point.vector, payload));
            }
            self.client
                .upsert_points(UpsertPointsBuilder::new(&self.collection, structs).wait(true))
                .await
                .map_err(qdrant_err)?;
            Ok(())
        })
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await
                .map_err(qdrant_err)?;
            Ok(())
        })
    }

    fn delete_repository(&self, repository_id: &str) -> BoxFuture<'_, Result<()>> {
        let filter = repository_filter(repository_id);
        Box::pin(async move {
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&self.collection)
                        .points(filter)
                        .wait(true),
                )
                .await
                .map_err(qdrant_err)?;
            Ok(())
        })
    }

    fn search(
        &self,
        repository_id: &str,
        query: Vec<f32>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<ScoredId>>> {
        let filter = repository_filter(repository_id);
        Box::pin(async move {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let builder = SearchPointsBuilder::new(&self.collection, query, u64::try_from(limit)?)
                .filter(filter);
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(qdrant_err)?;
            let scored = response
                .result
                .iter()
                .filter_map(|p| {
                    point_id_string(p).map(|id| ScoredId {
                        id,
                        score: p.score,
                    })
                })
                .collect();
            Ok(rank(scored, limit))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_does_not_connect_eagerly() {
        let index = QdrantVectorIndex::new("http://127.0.0.1:6334", DEFAULT_COLLECTION).unwrap();
        assert_eq!(index.collection(), DEFAULT_COLLECTION);
        assert_eq!(index.name(), "qdrant");
    }

    #[test]
    fn debug_hides_client() {
        let index = QdrantVectorIndex::new("http://127.0.0.1:6334", "c").unwrap();
        let dbg = format!("{index:?}");
        assert!(dbg.contains("QdrantVectorIndex"));
        assert!(dbg.contains("\"c\""));
    }

    #[test]
    fn point_id_string_reads_uuid() {
        let point = ScoredPoint {
            id: Some(PointId::from("6f1c0f4e-5a3b-5b8e-9d0a-1c2b3d4e5f60".to_string())),
            ..Default::default()
        };
        assert_eq!(
            point_id_string(&point).as_deref(),
            Some("6f1c0f4e-5a3b-5b8e-9d0a-1c2b3d4e5f60")
        );
        assert!(point_id_string(&ScoredPoint::default()).is_none());
    }
}
