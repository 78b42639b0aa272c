use std::sync::Arc;

use anyhow::Context;
use migration::MigratorTrait;
use sea_orm::Database;
use tokio::sync::{mpsc, watch};

use wallet_monitor_logic::{
    chain::{client::FanoutClient, multicall::MulticallBundler},
    ingest::Ingestor,
    names::AddressBook,
    render::{RenderConfig, Renderer},
    router::Processor,
    signatures::SignatureLookup,
    telegram::{self, DeliveryService},
    tokens::TokenResolver,
    trace::TraceDecoder,
    watchlist::{self, WatchlistCache},
};

use crate::settings::Settings;

/// Wires the full pipeline and runs until a shutdown signal arrives.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let shared_db = Database::connect(settings.database.url.clone())
        .await
        .context("connecting to the shared store")?;
    if settings.database.run_migrations {
        migration::Migrator::up(&shared_db, None)
            .await
            .context("running shared store migrations")?;
    }
    let shared_db = Arc::new(shared_db);

    let cache_url = format!(
        "sqlite://{}?mode=rwc",
        settings.storage.cache_db_path.display()
    );
    let cache_db = Database::connect(cache_url)
        .await
        .context("opening the embedded cache store")?;
    migration::LocalMigrator::up(&cache_db, None)
        .await
        .context("running cache store migrations")?;
    let cache_db = Arc::new(cache_db);

    let client = Arc::new(FanoutClient::new(
        &settings.chain.rpc_urls,
        settings.chain.rpc_timeout,
    )?);
    let bundler = Arc::new(MulticallBundler::new(
        client.clone(),
        settings.chain.multicall_address,
    ));
    let resolver = Arc::new(TokenResolver::new(
        bundler,
        cache_db.clone(),
        &settings.chain.base_tokens,
    ));
    let warmed = resolver.warm().await?;
    tracing::info!(tokens = warmed, "token cache warmed");
    let decoder = Arc::new(TraceDecoder::new(
        client.clone(),
        resolver,
        settings.trace.clone(),
    ));

    let names = Arc::new(AddressBook::load(&cache_db, &shared_db).await?);
    let signatures = Arc::new(SignatureLookup::new(
        cache_db.clone(),
        settings.signatures.clone(),
    ));

    let (removals, removal_inbox) = mpsc::unbounded_channel();
    let delivery = Arc::new(DeliveryService::new(&settings.delivery, removals));
    for (bot_id, handle) in delivery.bots() {
        let profile = handle
            .client
            .get_me()
            .await
            .with_context(|| format!("validating the token of bot '{bot_id}'"))?;
        tracing::info!(bot = %bot_id, username = %profile.username, "bot token validated");
    }
    let removal_task = tokio::spawn(telegram::run_removal_task(
        shared_db.clone(),
        removal_inbox,
    ));

    let watchlist_cache = Arc::new(WatchlistCache::new());
    let loaded = watchlist_cache
        .refresh(&shared_db, &delivery.open_access_bots())
        .await
        .context("loading the watchlist")?;
    tracing::info!(addresses = loaded, "watchlist loaded");

    let renderer = Arc::new(Renderer::new(
        RenderConfig::new(&settings.chain, settings.inline_buttons.clone()),
        names,
    ));

    let (emit, incoming) = mpsc::channel(settings.ingest.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingestor = Ingestor::new(
        client,
        settings.storage.checkpoint_path.clone(),
        settings.ingest.clone(),
    )
    .await
    .context("initializing the ingestor")?;
    let processor = Processor::new(
        watchlist_cache.clone(),
        decoder,
        signatures,
        renderer,
        delivery.clone(),
        &settings.processor,
    );

    let refresher_task = tokio::spawn(watchlist::run_refresher(
        watchlist_cache,
        shared_db.clone(),
        delivery.open_access_bots(),
        settings.watchlist.refresh_interval,
        shutdown_rx.clone(),
    ));
    let ingest_task = tokio::spawn(ingestor.run(emit, shutdown_rx));
    let processor_task = tokio::spawn(processor.run(incoming));

    if let Some(owner) = settings.owner_chat_id {
        if let Some(bot) = settings.delivery.bots.first() {
            let subscriber = format!("{owner}@{}", bot.id);
            if let Err(err) = delivery
                .send(&subscriber, "wallet monitor started".to_string(), None)
                .await
            {
                tracing::warn!(error = %err, "failed to notify the owner chat");
            }
        }
    }

    tracing::info!("wallet monitor running");
    tokio::signal::ctrl_c()
        .await
        .context("listening for the shutdown signal")?;
    tracing::info!("shutdown signal received, draining");

    shutdown_tx.send(true)?;
    ingest_task.await??;
    // the ingestor dropped its emitter, so the processor drains and
    // stops on its own
    processor_task.await?;
    refresher_task.await?;
    drop(delivery);
    removal_task.await?;

    tracing::info!("shutdown complete");
    Ok(())
}
