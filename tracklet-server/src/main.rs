//! # Tracklet Server
//!
//! Self-hosted package-tracking server. Keeps a set of parcel shipments
//! synchronized with carrier tracking sources (UPS, USPS, FedEx, DHL) and
//! enriches them by scanning a mailbox for shipping notifications.
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - SQLite (via sqlx) for persistent storage
//! - A two-tier write-through cache for refresh responses
//! - One refresh coordinator through which every carrier lookup flows
//! - Background tasks for auto-update, cache sweeping, and email ingestion

pub mod admin;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracklet_config::Config;
use tracklet_core::email::HttpExtractionModel;
use tracklet_core::{
    AutoUpdateScheduler, ClientFactory, Database, EmailIngestWorker,
    ImapMailbox, RefreshCache, RefreshCoordinator,
};

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "tracklet_server=info,tracklet_core=info,tower_http=warn"
                        .into()
                }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(
        Config::from_env().context("failed to load configuration")?,
    );
    info!("configuration loaded");

    let db = Database::connect(&config.database.path)
        .await
        .context("failed to open database")?;

    let cache =
        RefreshCache::initialize(db.refresh_cache(), &config.cache)
            .await
            .context("failed to initialize refresh cache")?;

    let factory = Arc::new(ClientFactory::new(config.carriers.clone()));
    let coordinator = Arc::new(RefreshCoordinator::new(
        db.clone(),
        cache.clone(),
        factory.clone(),
        &config.rate_limit,
    ));

    let shutdown = CancellationToken::new();

    let scheduler = Arc::new(AutoUpdateScheduler::new(
        db.clone(),
        coordinator.clone(),
        factory.clone(),
        config.scheduler.clone(),
        &config.rate_limit,
        shutdown.clone(),
    ));
    let scheduler_task = tokio::spawn(scheduler.clone().run());

    let email_task = match &config.email {
        Some(email_settings) => {
            let mailbox =
                Arc::new(ImapMailbox::new(email_settings.clone()));
            let model = config.llm.as_ref().map(|llm| {
                Arc::new(HttpExtractionModel::new(llm))
                    as Arc<dyn tracklet_core::email::ExtractionModel>
            });
            if model.is_none() {
                info!(
                    "no LLM configured; email extraction is regex-only"
                );
            }
            let worker = Arc::new(EmailIngestWorker::new(
                db.clone(),
                coordinator.clone(),
                mailbox,
                model,
                email_settings,
                shutdown.clone(),
            ));
            Some(tokio::spawn(worker.run()))
        }
        None => {
            info!("no mailbox configured; email ingestion disabled");
            None
        }
    };

    let app_state = AppState {
        config: config.clone(),
        db,
        cache: cache.clone(),
        coordinator,
        scheduler,
    };
    let app = routes::build_router(app_state);

    let addr =
        format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "tracklet server listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .context("server error")?;

    // Drain background work to a safe point, bounded by the shutdown
    // timeout; tasks that do not exit in time are abandoned.
    info!("shutting down background tasks");
    shutdown.cancel();
    let drain = async {
        if let Err(err) = scheduler_task.await {
            error!(error = %err, "scheduler task did not exit cleanly");
        }
        if let Some(task) = email_task
            && let Err(err) = task.await
        {
            error!(error = %err, "email worker did not exit cleanly");
        }
        cache.close().await;
    };
    if tokio::time::timeout(config.shutdown_timeout, drain)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.shutdown_timeout.as_secs(),
            "background tasks exceeded the shutdown deadline"
        );
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
