use common::utils::config::get_config;
use ingestion_pipeline::run_worker_loop;
use main::bootstrap;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let components = bootstrap::build(config).await?;

    run_worker_loop(components.db, components.ingestion_pipeline).await
}
