//! mediatext - multi-modal media-to-text recognition service
//!
//! Process lifecycle: load config, open the database, recover stale leases
//! from a previous run, start the per-kind worker pools, serve the HTTP
//! ingress, and on shutdown drain in-flight jobs before exiting.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mediatext::config::Config;
use mediatext::dispatcher::{Dispatcher, DispatcherConfig};
use mediatext::engines::{OcrEngine, SpeechEngine};
use mediatext::metrics::Metrics;
use mediatext::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting mediatext recognition service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db = mediatext::db::init_database_pool(&db_path).await?;

    let metrics = Arc::new(Metrics::new());

    let mut dispatcher = Dispatcher::new(
        db.clone(),
        Arc::clone(&metrics),
        DispatcherConfig::from(&config),
    );
    dispatcher.register_engine(Arc::new(OcrEngine::new(
        config.ocr_endpoint.clone(),
        config.ocr_api_key.clone(),
        config.ocr_languages.clone(),
    )));
    dispatcher.register_engine(Arc::new(SpeechEngine::new(
        config.speech_endpoint.clone(),
        config.speech_api_key.clone(),
    )));
    let dispatcher = Arc::new(dispatcher);

    // Crash recovery: re-queue jobs a previous run left in processing
    dispatcher.recover().await?;

    let shutdown = CancellationToken::new();
    let mut workers = dispatcher.clone().spawn(shutdown.clone());

    let state = AppState::new(db.clone(), metrics);
    let app = mediatext::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!("Listening on http://{}", config.bind_address);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received, draining workers");
            server_shutdown.cancel();
        })
        .await?;

    // Workers finish their claimed jobs before exiting
    shutdown.cancel();
    while workers.join_next().await.is_some() {}
    db.close().await;

    info!("Shutdown complete");
    Ok(())
}
