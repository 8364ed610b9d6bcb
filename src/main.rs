use anyhow::Context;
use edge_gateway::{config::GatewayConfig, init_gateway, init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies
    dotenvy::dotenv().ok();

    // Config file path from the first argument, or the default location
    let config_path = env::args().nth(1);

    let config = GatewayConfig::load(config_path.as_deref()).with_context(|| {
        format!(
            "Failed to load configuration from {}",
            config_path
                .as_deref()
                .unwrap_or(edge_gateway::config::DEFAULT_CONFIG_PATH)
        )
    })?;

    init_tracing(config.server.log_format);

    init_gateway(config).await.context("Gateway error")?;

    Ok(())
}
