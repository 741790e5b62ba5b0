//! Semantic search over the live Hacker News firehose.
//!
//! Startup order: catalog sync (backfill + tailer), embedding catchup,
//! vector index build, then the HTTP server. The first three are skippable
//! via `OPTS` for a query-only deployment.
use anyhow::{Context, Result};
use hn_api::ApiClient;
use hn_embed::{DocumentEmbedder, Embedder, OpenAiModel};
use hn_store::{EmbeddingStore, ItemStore, MissingIds};
use hn_sync::{SyncService, Telemetry};
use hn_vector::{QueryEngine, VectorIndex};
use log::{error, info, warn};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;

mod answer;
mod config;
mod http;

use answer::AnswerService;
use config::ServerConfig;

/// Cadence of the realtime embedding worker.
const EMBED_REALTIME_FREQ: Duration = Duration::from_secs(900);

fn init_logger() -> Result<()> {
    flexi_logger::Logger::try_with_env_or_str("info")?
        .format(flexi_logger::detailed_format)
        .start()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        error!("{err:#}");
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    init_logger()?;

    let api = Arc::new(ApiClient::new()?);
    let items = Arc::new(ItemStore::open(&config.db_path)?);
    // The query path reads through its own connection so searches never
    // wait on ingest commits.
    let query_items = Arc::new(ItemStore::open_read_only(&config.db_path)?);
    let embeddings = Arc::new(EmbeddingStore::open(&config.embeddings_path)?);
    let missing = Arc::new(MissingIds::load(&config.missing_path)?);
    let telemetry = Arc::new(Telemetry::new());

    let model = Arc::new(OpenAiModel::new(&config.api_base_url, &config.api_key)?);
    let (encoder, mut dispatcher) =
        Embedder::spawn(model.clone(), Some(config.cache_path.as_path()));

    let sync = Arc::new(SyncService::new(
        api.clone(),
        items.clone(),
        missing.clone(),
        telemetry.clone(),
        config.opts.offset,
    ));

    // Tailer first so live events buffer while the backfill runs.
    let mut tailer: Option<JoinHandle<Result<()>>> = None;
    if config.opts.nosync {
        info!("Sync disabled by OPTS");
    } else {
        let service = sync.clone();
        tailer = Some(tokio::spawn(async move { service.watch_updates().await }));

        info!("Catching up on data updates...");
        sync.backfill().await.context("Backfill failed")?;
    }

    let doc_embedder = Arc::new(DocumentEmbedder::new(
        items.clone(),
        embeddings.clone(),
        encoder.clone(),
    ));
    if config.opts.noembed {
        info!("Catchup embedding disabled by OPTS");
    } else {
        info!("Catching up on document embeddings...");
        doc_embedder
            .catchup(config.opts.offset)
            .await
            .context("Embedding catchup failed")?;
    }

    info!("Creating vector index...");
    let index = Arc::new(
        VectorIndex::build(embeddings.clone(), encoder.clone())
            .context("Failed to build vector index")?,
    );

    {
        let catalog: std::collections::HashSet<u64> =
            items.eligible_story_ids()?.into_iter().collect();
        let orphans = embeddings.orphan_stories(&catalog)?;
        if !orphans.is_empty() {
            warn!(
                "{} embedded stories are no longer eligible in the catalog",
                orphans.len()
            );
        }
    }

    // Periodically drain the affected-story set into fresh embeddings and
    // index updates.
    let worker = {
        let sync = sync.clone();
        let doc_embedder = doc_embedder.clone();
        let index = index.clone();
        let telemetry = telemetry.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(EMBED_REALTIME_FREQ).await;
                let affected = sync.drain_affected();
                if affected.is_empty() {
                    continue;
                }

                info!("Processing affected stories: {}", affected.len());
                match doc_embedder.process_stories(&affected).await {
                    Ok(processed) => {
                        telemetry.record_embed_run(processed.len());
                        if let Err(err) = index.update(&processed) {
                            error!("Failed to refresh index: {err}");
                        }
                    }
                    Err(err) => error!("Realtime embedding failed: {err}"),
                }
            }
        })
    };

    let engine = QueryEngine::new(index.clone(), query_items.clone());
    let answers = AnswerService::new(model, query_items.clone());
    let state = Arc::new(http::AppState {
        index,
        engine,
        items: query_items,
        embeddings,
        sync: sync.clone(),
        telemetry,
        encoder,
        answers,
        passwd: config.passwd.clone(),
        debug: config.opts.debug,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    info!("Listening on {}", listener.local_addr()?);
    let mut server = tokio::spawn(async move { axum::serve(listener, http::router(state)).await });

    // If any long-lived task exits, cancel the rest and leave.
    let tailer_exit = async {
        match tailer.as_mut() {
            Some(handle) => {
                let _ = handle.await;
            }
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        _ = tailer_exit => warn!("Tailer exited"),
        _ = &mut dispatcher => warn!("Embedding dispatcher exited"),
        result = &mut server => warn!("Http server exited: {result:?}"),
    }

    info!("Exiting...");
    sync.shutdown();
    worker.abort();
    server.abort();
    dispatcher.abort();
    if let Some(handle) = tailer {
        handle.abort();
    }
    Ok(())
}
