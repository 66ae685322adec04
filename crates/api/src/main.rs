use anyhow::Result;
use pantry_api::{build_app_with_config, ApiConfig};
use pantry_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("pantry_api");

    let config = ApiConfig::from_env();
    let bind = config.bind.clone();
    let storage = config
        .database_url
        .clone()
        .unwrap_or_else(|| "memory".to_string());

    let app = build_app_with_config(config).await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, storage = %storage, "pantry concierge api started");

    axum::serve(listener, app).await?;
    Ok(())
}
