mod config;

use std::sync::Arc;

use axum::http::{
    Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use herald_api::auth::{AppState, AppStateInner, bootstrap_moderator};
use herald_api::blob::DiskBlobStore;
use herald_api::routes;
use herald_api::session::MemorySessionStore;
use herald_api::token::TokenCodec;
use herald_api::workflow::{FixedReceipts, RandomReceipts, ReceiptPolicy};

use crate::config::{Config, ReceiptMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald=debug,herald_api=debug,herald_db=info,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = herald_db::Database::open(&config.db_path)?;
    let blobs = DiskBlobStore::new(config.image_dir.clone()).await?;

    let receipts: Arc<dyn ReceiptPolicy> = match config.receipts {
        ReceiptMode::Random => Arc::new(RandomReceipts),
        ReceiptMode::Read => Arc::new(FixedReceipts(true)),
        ReceiptMode::Unread => Arc::new(FixedReceipts(false)),
    };

    let state: AppState = Arc::new(AppStateInner {
        db: Arc::new(db),
        tokens: TokenCodec::new(&config.jwt_secret),
        sessions: Arc::new(MemorySessionStore::new()),
        blobs: Arc::new(blobs),
        receipts,
        storage_timeout: config.storage_timeout,
        image_base_url: config.image_base_url.clone(),
    });

    if let Some((login, password)) = &config.moderator {
        bootstrap_moderator(&state, login, password)
            .await
            .map_err(|e| anyhow::anyhow!("moderator bootstrap failed: {}", e))?;
    }

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    let app = routes::router(state, &config.image_dir)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    info!("Herald server listening on {}", config.addr);
    info!(
        "Read receipts: {:?}, storage timeout: {:?}",
        config.receipts, config.storage_timeout
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {}", e);
                    ctrl_c.await.ok();
                    info!("Received Ctrl+C, shutting down...");
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
