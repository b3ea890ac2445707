use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use idsync_core::{ConsolidationWorker, MokaCache, SyncEngine, SyncState};
use idsync_graph::{Collapser, GraphConfig, GraphStore};
use idsync_server::{logging, router, ServerConfig};
use regex::Regex;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    logging::init(&config.log_level, config.log_format)?;

    let cache = Arc::new(MokaCache::<SyncState>::new(config.cache_max_entries));
    let cache_path = config.cache_path();
    cache
        .load_file(&cache_path)
        .await
        .context("failed to load cache snapshot")?;

    let mut engine = SyncEngine::new(Arc::clone(&cache), config.cookie_domain.clone());
    let mut worker = None;
    if config.consolidate {
        let bot_pattern = Regex::new(&config.bot_pattern).context("invalid BOT_PATTERN")?;
        let store =
            GraphStore::from_config(GraphConfig::from_env()).context("failed to build graph client")?;
        store
            .create_schema()
            .await
            .context("failed to install graph schema")?;

        let collapser = Collapser::new(store).with_bot_pattern(bot_pattern);
        let (queue, handle) =
            ConsolidationWorker::spawn(Arc::new(collapser), config.consolidate_queue);
        engine = engine.with_queue(queue);
        worker = Some(handle);
        info!(component = "server", queue = config.consolidate_queue, "graph consolidation enabled");
    }

    let app = router(Arc::new(engine), &config.path_prefix);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(
        component = "server",
        addr = %config.listen_addr,
        prefix = %config.path_prefix,
        domain = %config.cookie_domain,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // The router owned the last queue handle, so the worker drains and exits.
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            warn!(component = "server", error = %e, "consolidation worker did not stop cleanly");
        }
    }

    cache
        .save_file(&cache_path)
        .await
        .context("failed to save cache snapshot")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(component = "server", error = %e, "failed to listen for ctrl-c");
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
                error!(component = "server", error = %e, "failed to register SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!(component = "server", "shutting down");
}
