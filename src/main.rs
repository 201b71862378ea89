use std::sync::Arc;

use adaptive_engine::adaptive::{DecisionManager, PersistenceBridge, SeededRandom, ThreadRandom};
use adaptive_engine::config::EngineConfig;
use adaptive_engine::db::SqliteStore;
use adaptive_engine::logging;
use adaptive_engine::workers::FlushWorker;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = EngineConfig::from_env();
    let _log_guard = logging::init(&config.log);

    let store = match SqliteStore::connect(&config.database_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, url = %config.database_url, "failed to open stats store");
            std::process::exit(1);
        }
    };

    let manager = Arc::new(match config.rng_seed {
        Some(seed) => {
            tracing::info!(seed, "using seeded random source");
            DecisionManager::new(Arc::new(SeededRandom::new(seed)))
        }
        None => DecisionManager::new(Arc::new(ThreadRandom)),
    });

    let bridge = Arc::new(PersistenceBridge::new(
        Arc::clone(&manager),
        store.clone(),
        store,
        config.persist_timeout,
    ));

    if let Err(e) = bridge.bootstrap().await {
        tracing::error!(error = %e, "bootstrap failed; starting with an empty state table");
    }

    let worker = FlushWorker::new(
        Arc::clone(&bridge),
        config.flush_interval,
        config.config_reload_interval,
    );
    worker.start().await;

    tracing::info!(states = manager.len(), "adaptive engine running");
    shutdown_signal().await;

    tracing::info!("shutdown signal received");
    worker.stop().await;
    tracing::info!("graceful shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
