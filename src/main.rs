use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loomchat::manager::runtime::LogDialog;
use loomchat::services::DisabledSearch;
use loomchat::{build_app, create_router, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("loomchat={}", config.log_level))),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_addr = config.bind_addr.clone();
    let (state, _parse_worker) =
        build_app(config, Arc::new(DisabledSearch), Arc::new(LogDialog)).await?;

    // Start the managed runtime and mirror installed models into the local
    // supplier before accepting requests.
    state.manager.bootstrap().await;

    let app = create_router(state.clone());
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.manager.shutdown();
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
