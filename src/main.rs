use std::process::ExitCode;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bookkeeper_bot::classifier::{ClassifierError, OpenAiClassifier};
use bookkeeper_bot::config::{Config, ConfigError};
use bookkeeper_bot::dispatch::Dispatcher;
use bookkeeper_bot::idempotency::Coalescer;
use bookkeeper_bot::pool::maintenance::{spawn_cache_warm_up, spawn_pool_replenishment};
use bookkeeper_bot::pool::{LedgerGenerator, LedgerPool};
use bookkeeper_bot::repo::{BillStore, LedgerStore, UserStore};
use bookkeeper_bot::server::{AppState, build_router};
use bookkeeper_bot::services::Services;
use bookkeeper_bot::store::StoreError;
use bookkeeper_bot::store::feishu::FeishuDocumentStore;
use bookkeeper_bot::tasks::TaskQueue;

#[derive(Debug, Error)]
enum StartupError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("document store client: {0}")]
    Store(#[from] StoreError),

    #[error("classifier client: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bookkeeper_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Bookkeeper bot failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;
    let shutdown = CancellationToken::new();

    let store = Arc::new(FeishuDocumentStore::new(config.feishu.clone())?);
    let ledgers = Arc::new(LedgerStore::new(
        Arc::clone(&store),
        config.registry_container.clone(),
        config.ledger_table.clone(),
    ));
    let users = Arc::new(UserStore::new(
        Arc::clone(&store),
        config.registry_container.clone(),
        config.user_table.clone(),
    ));
    let bills = Arc::new(BillStore::new(Arc::clone(&store), config.utc_offset));

    let generator = LedgerGenerator::new(Arc::clone(&store), Arc::clone(&ledgers), config.generation.clone());
    let pool = Arc::new(LedgerPool::new(Arc::clone(&ledgers), generator, config.pool));

    let (tasks, task_supervisor) = TaskQueue::start(shutdown.clone());
    let services = Arc::new(
        Services::new(Arc::clone(&users), bills, Arc::clone(&pool), tasks)
            .with_source_url(config.source_url.clone()),
    );

    let classifier = Arc::new(OpenAiClassifier::new(config.classifier.clone())?);
    let dispatcher = Dispatcher::new(services, classifier, Coalescer::new(config.coalesce));

    let maintenance = [
        spawn_pool_replenishment(Arc::clone(&pool), config.maintenance.pool_interval, shutdown.clone()),
        spawn_cache_warm_up(users, ledgers, config.maintenance.cache_interval, shutdown.clone()),
        task_supervisor,
    ];

    let app = build_router(AppState::new(Arc::new(dispatcher), config.wechat_token.clone()));
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => {
                    warn!(error = %e, "Listening for shutdown signal failed");
                    std::future::pending::<()>().await;
                }
            }
            signal.cancel();
        })
        .await;

    shutdown.cancel();
    for handle in maintenance {
        if let Err(e) = handle.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }

    served?;
    info!("Stopped");
    Ok(())
}
