use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;
use training_backend::{build_state, config::Config, routes::build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    match &config.data_dir {
        Some(dir) => tracing::info!("persisting content under {}", dir.display()),
        None => tracing::warn!("DATA_DIR is not set, content lives in memory only"),
    }
    if config.admin_secret.is_none() {
        tracing::warn!("ADMIN_SECRET is not set, admin routes are disabled");
    }

    let state = build_state(config)?;
    if state.remote.is_some() {
        let sync_state = state.clone();
        tokio::spawn(async move {
            let status = sync_state.run_sync().await;
            tracing::info!("startup sync finished: {:?}", status);
        });
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("backend listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
