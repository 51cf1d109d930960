use anyhow::Context;
use mediaflow_api::{setup, telemetry};
use mediaflow_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env().context("Failed to load configuration")?;

    telemetry::init_telemetry(&config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;
    tracing::info!(environment = %config.environment, "Configuration loaded and validated successfully");

    let (state, router) = setup::initialize_app(config).await?;
    setup::server::start_server(state, router).await?;

    Ok(())
}
