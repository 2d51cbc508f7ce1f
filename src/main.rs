use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use repo_sync::config::SyncConfig;
use repo_sync::context::SyncContext;
use repo_sync::git::CommandGit;
use repo_sync::github::OctocrabRemote;
use repo_sync::notify::Notifier;
use repo_sync::platform::MemoryPlatform;
use repo_sync::server::{AppState, build_router};
use repo_sync::store::MemoryStore;
use repo_sync::worker::{Dispatcher, DispatcherConfig, EventRouter, JobRunner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env()?;
    info!(?config, "configuration loaded");

    std::fs::create_dir_all(&config.spool_dir)?;
    std::fs::create_dir_all(&config.repos_dir)?;

    let (job_tx, job_rx) = mpsc::unbounded_channel();
    let store = Arc::new(MemoryStore::new());
    let platform = Arc::new(MemoryPlatform::new().with_job_sender(job_tx));
    let remote = Arc::new(OctocrabRemote::from_app_key(
        config.app_id,
        &config.app_private_key,
    )?);
    let git = Arc::new(CommandGit::new(&config.repos_dir));

    let ctx = SyncContext::new(
        store.clone(),
        platform,
        remote,
        git,
        Arc::new(Notifier::new()),
        config.settings(),
    );

    let shutdown = CancellationToken::new();

    let dispatcher = Dispatcher::new(
        DispatcherConfig::new(&config.spool_dir).with_worker_count(config.worker_count),
        EventRouter::new(ctx.clone()),
    );
    let recovered = dispatcher.recover()?;
    if recovered > 0 {
        info!(recovered, "released deliveries interrupted by the last shutdown");
    }
    info!(
        pending = repo_sync::spool::count_pending(&config.spool_dir)?,
        "spool ready"
    );
    let waker = dispatcher.waker();
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown.clone()));
    let jobs_task = tokio::spawn(JobRunner::new(ctx).run(job_rx, shutdown.child_token()));

    let app = build_router(AppState::new(
        &config.spool_dir,
        config.webhook_secret(),
        store,
        waker,
    ));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => error!(error = %e, "failed to listen for ctrl-c, shutting down"),
            }
            shutdown.cancel();
        }
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.child_token().cancelled_owned())
        .await?;

    shutdown.cancel();
    for (name, task) in [("dispatcher", dispatcher_task), ("job runner", jobs_task)] {
        if let Err(e) = task.await {
            error!(task = name, error = %e, "background task panicked");
        }
    }
    info!("stopped");
    Ok(())
}
