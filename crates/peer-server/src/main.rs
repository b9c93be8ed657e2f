mod logging;
mod routes;
mod webhook;
mod workers;

use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::info;

use peer_analyzers::Registry;
use peer_autofix::{apply::ApplyEngine, preview::PreviewEngine};
use peer_core::{
    config::Config,
    db::Db,
    github::{HostApi, HostClient},
    kv::KvStore,
    queue::JobQueue,
};
use peer_llm::provider::default_providers;

// ── AppState ──────────────────────────────────────────────────────────────

pub struct AppState {
    pub db: Arc<Db>,
    pub config: Arc<Config>,
    pub queues: Arc<JobQueue>,
    pub host: Arc<dyn HostApi>,
    pub start_time: Instant,
    pub log_tx: broadcast::Sender<String>,
    pub log_ring: Arc<std::sync::Mutex<VecDeque<String>>>,
}

// ── main ──────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let (log_tx, _log_rx) = broadcast::channel::<String>(1024);
    let log_ring: Arc<std::sync::Mutex<VecDeque<String>>> =
        Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(500)));

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "peer_server=info,peer_core=info,peer_analyzers=info,peer_llm=info,peer_autofix=info,tower_http=warn".into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(logging::BroadcastLayer {
            tx: log_tx.clone(),
            ring: Arc::clone(&log_ring),
        })
        .init();

    let config = Arc::new(Config::from_env()?);

    // A malformed encryption key is fatal: user API keys would silently
    // become undecryptable mid-pipeline otherwise.
    if !config.encryption_key.is_empty() {
        peer_core::crypto::KeyCipher::from_base64(&config.encryption_key)?;
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let db_path = format!("{}/peer.db", config.data_dir);
    let db = Db::open(&db_path)?;
    db.migrate()?;
    let db = Arc::new(db);

    let kv = Arc::new(KvStore::new());
    let queues = Arc::new(JobQueue::new(Arc::clone(&kv)));

    let host: Arc<dyn HostApi> = Arc::new(HostClient::new(
        &config.github_api_url,
        &config.github_token,
    )?);

    let router = Arc::new(peer_llm::Router::new(
        default_providers(&config),
        Arc::clone(&kv),
        &config,
    ));
    let registry = Arc::new(Registry::standard(Some(Arc::clone(&router))));
    info!(analyzers = ?registry.names(), "analyzer registry ready");

    let preview = Arc::new(PreviewEngine::new(
        Arc::clone(&db),
        Arc::clone(&router),
        Arc::clone(&config),
    ));
    let apply = Arc::new(ApplyEngine::new(
        Arc::clone(&db),
        Arc::clone(&config),
        Arc::clone(&host),
    ));

    workers::register(Arc::new(workers::WorkerContext {
        db: Arc::clone(&db),
        config: Arc::clone(&config),
        registry,
        queues: Arc::clone(&queues),
        kv: Arc::clone(&kv),
        preview,
        apply,
    }))
    .await;

    // Periodic sweep of expired cache / queue keys.
    {
        let kv = Arc::clone(&kv);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(300)).await;
                let dropped = kv.sweep();
                if dropped > 0 {
                    tracing::debug!(dropped, "kv sweep");
                }
            }
        });
    }

    let state = Arc::new(AppState {
        db,
        config: Arc::clone(&config),
        queues: Arc::clone(&queues),
        host,
        start_time: Instant::now(),
        log_tx,
        log_ring,
    });

    let app = Router::new()
        // Inbound webhooks
        .route("/webhook", post(webhook::handle))
        // Health
        .route("/api/health", get(routes::health))
        // Run polling
        .route("/api/runs", get(routes::list_runs))
        .route("/api/runs/:id", get(routes::get_run))
        .route("/api/runs/:id/patches", post(routes::create_patch))
        // Patch polling
        .route("/api/patches/:id", get(routes::get_patch))
        .route("/api/patches/:id/files/*file", get(routes::get_patch_file))
        .route("/api/patches/:id/apply", post(routes::apply_patch))
        // Notifications
        .route("/api/notifications/:user_id", get(routes::list_notifications))
        // SSE logs
        .route("/api/logs", get(routes::sse_logs))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("{}:{}", config.web_bind, config.web_port);
    info!("Listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Graceful shutdown: stop accepting, then drain in-flight jobs.
    let shutdown_queues = Arc::clone(&queues);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining workers");
        })
        .await?;
    shutdown_queues.drain().await;
    info!("peer-server stopped");

    Ok(())
}
