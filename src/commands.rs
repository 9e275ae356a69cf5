use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use reposcope_core::bootstrap::open_store;
use reposcope_core::{Config, Services};
use reposcope_index::acquire::{Acquire, LocalAcquirer};
use reposcope_index::repository::Repository;
use reposcope_index::search::SearchResult;
use tokio_util::sync::CancellationToken;

/// Lines of chunk content shown per hit in text output.
const PREVIEW_LINES: usize = 8;

pub async fn index(config: Config, url: &str, local: Option<PathBuf>) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let acquirer: Arc<dyn Acquire> = match local {
        Some(dir) => Arc::new(LocalAcquirer::new(dir)),
        None => services.git_acquirer(),
    };

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e:#}");
            return;
        }
        tracing::warn!("interrupt received, stopping at the next checkpoint");
        signal_token.cancel();
    });

    let indexer = services.indexer(acquirer, cancel);
    let report = indexer
        .index_repository(url, services.git_token())
        .await
        .with_context(|| format!("indexing {url} failed"))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn search(
    config: Config,
    url: &str,
    query: &str,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let services = Services::from_config(config).await?;
    let results = services.search_service().search(url, query, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("no results");
    } else {
        for (rank, result) in results.iter().enumerate() {
            print_result(rank + 1, result);
        }
    }
    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    let chunk = &result.chunk;
    let name = match (&chunk.class_name, &chunk.function_name) {
        (Some(class), Some(function)) => format!(" {class}.{function}"),
        (None, Some(function)) => format!(" {function}"),
        (Some(class), None) => format!(" {class}"),
        (None, None) => String::new(),
    };
    println!(
        "{rank}. {}:{}-{} [{}{name}] similarity {:.3}",
        chunk.file_path,
        chunk.line_start + 1,
        chunk.line_end + 1,
        chunk.chunk_type,
        result.similarity,
    );
    let body = chunk.body().lines().skip_while(|line| line.trim().is_empty());
    for line in body.take(PREVIEW_LINES) {
        println!("    {line}");
    }
    println!();
}

pub async fn status(config: &Config, url: &str) -> anyhow::Result<()> {
    let (registry, store) = open_store(config).await?;
    let Some(repository) = registry.find_by_url(url).await? else {
        println!("{url} is not indexed");
        return Ok(());
    };
    let chunks = store.chunk_count(&repository.id).await?;
    print_repository(&repository);
    println!("  chunks:     {chunks}");
    Ok(())
}

pub async fn list(config: &Config) -> anyhow::Result<()> {
    let (registry, store) = open_store(config).await?;
    let repositories = registry.list().await?;
    if repositories.is_empty() {
        println!("no repositories indexed");
    }
    for repository in &repositories {
        let chunks = store.chunk_count(&repository.id).await?;
        println!("{} ({chunks} chunks)", repository.source_url);
    }
    Ok(())
}

fn print_repository(repository: &Repository) {
    println!("{}", repository.display_name);
    println!("  id:         {}", repository.id);
    println!("  source:     {}", repository.source_url);
    println!("  created:    {}", repository.created_at);
    match (&repository.embedding_model, repository.embedding_dims) {
        (Some(model), Some(dims)) => println!("  model:      {model} ({dims} dims)"),
        _ => println!("  model:      none"),
    }
}

pub async fn forget(config: &Config, url: &str) -> anyhow::Result<()> {
    let (registry, store) = open_store(config).await?;
    let Some(repository) = registry.find_by_url(url).await? else {
        println!("{url} is not indexed");
        return Ok(());
    };
    let removed = store.delete_repository_chunks(&repository.id).await?;
    registry.delete(&repository.id).await?;
    tracing::info!(repository = %repository.source_url, removed, "repository forgotten");
    println!("removed {} and {removed} chunks", repository.source_url);
    Ok(())
}
