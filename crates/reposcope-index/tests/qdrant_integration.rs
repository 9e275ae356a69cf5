use std::sync::Arc;

use reposcope_embed::mock::MockEmbedder;
use reposcope_index::chunker::{ChunkDraft, ChunkKind};
use reposcope_index::languages::Lang;
use reposcope_index::qdrant::QdrantVectorIndex;
use reposcope_index::repository::RepositoryRegistry;
use reposcope_index::store::{CodeStore, EmbeddedChunk, chunk_id, open_pool};
use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);
const DIMS: usize = 64;

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup() -> (CodeStore, RepositoryRegistry, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let url = format!("http://127.0.0.1:{grpc_port}");

    let pool = open_pool(":memory:", 1).await.unwrap();
    let index = Arc::new(QdrantVectorIndex::new(&url, "reposcope_test").unwrap());
    let store = CodeStore::with_index(pool.clone(), index, DIMS).await.unwrap();
    (store, RepositoryRegistry::new(pool), container)
}

fn chunk(repository_id: &str, mock: &MockEmbedder, name: &str, body: &str) -> EmbeddedChunk {
    let draft = ChunkDraft {
        file_path: format!("{name}.py"),
        language: Lang::Python,
        kind: ChunkKind::Function,
        function_name: Some(name.to_string()),
        class_name: None,
        line_start: 0,
        line_end: 1,
        import_context: Vec::new(),
        content: body.to_string(),
        content_hash: blake3::hash(body.as_bytes()).to_hex().to_string(),
    };
    EmbeddedChunk {
        id: chunk_id(repository_id, &draft),
        embedding: mock.vector_for(body),
        draft,
    }
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn qdrant_search_is_repository_scoped() {
    let (store, registry, _container) = setup().await;
    let mock = MockEmbedder::new(DIMS);

    let a = registry.register("https://e.com/a", "a", Some("/a")).await.unwrap();
    let b = registry.register("https://e.com/b", "b", Some("/b")).await.unwrap();

    store
        .upsert_chunks(
            &a.id,
            "run",
            &[
                chunk(&a.id, &mock, "parse", "parse config file"),
                chunk(&a.id, &mock, "render", "render html page"),
            ],
        )
        .await
        .unwrap();
    store
        .upsert_chunks(&b.id, "run", &[chunk(&b.id, &mock, "parse", "parse config file")])
        .await
        .unwrap();

    let hits = store
        .search(&a.id, mock.vector_for("parse config"), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|(c, _)| c.repository_id == a.id));
    assert_eq!(hits[0].0.function_name.as_deref(), Some("parse"));
}

#[tokio::test]
#[ignore = "requires a Docker daemon"]
async fn qdrant_prune_and_delete_repository() {
    let (store, registry, _container) = setup().await;
    let mock = MockEmbedder::new(DIMS);
    let repo = registry.register("https://e.com/r", "r", Some("/r")).await.unwrap();

    store
        .upsert_chunks(&repo.id, "run-1", &[chunk(&repo.id, &mock, "old", "old code")])
        .await
        .unwrap();
    store
        .upsert_chunks(&repo.id, "run-2", &[chunk(&repo.id, &mock, "new", "new code")])
        .await
        .unwrap();

    assert_eq!(store.prune_stale(&repo.id, "run-2").await.unwrap(), 1);
    let hits = store
        .search(&repo.id, mock.vector_for("old code"), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.function_name.as_deref(), Some("new"));

    store.delete_repository_chunks(&repo.id).await.unwrap();
    let hits = store
        .search(&repo.id, mock.vector_for("new code"), 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}
