use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use common::utils::config::get_config;
use main::bootstrap;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    // Get config
    let config = get_config()?;
    let http_port = config.http_port;

    let components = bootstrap::build(config).await?;
    let api_state = ApiState::new(
        components.db,
        components.config,
        components.storage,
        components.index_registry,
        components.metrics,
        components.orchestrator,
        components.streaming,
        components.ingestion_pipeline,
        components.query_limiter,
        components.ingest_limiter,
    );

    let app = Router::new()
        .nest("/v1", api_routes_v1(&api_state))
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
