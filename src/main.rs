use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use truck_dispatch::api;
use truck_dispatch::clients::http::DownstreamHttpClient;
use truck_dispatch::config::Config;
use truck_dispatch::engine::ExternalServices;
use truck_dispatch::error::AppError;
use truck_dispatch::state::AppState;
use truck_dispatch::store::{MemoryStore, PostgresStore, RequestStore};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let store: Arc<dyn RequestStore> = match &config.database_url {
        Some(url) => Arc::new(PostgresStore::connect(url, config.database_max_connections).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; service requests are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let services = ExternalServices::from_http(DownstreamHttpClient::new(config.downstream.clone())?);
    let shared_state = Arc::new(AppState::new(store, services));
    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        backend = shared_state.lifecycle.backend(),
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
