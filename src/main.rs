mod ai;
mod config;
mod dispatch;
mod eligibility;
mod platform;
mod relay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,askrelay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Pick up variables from a local .env, if any
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  AI endpoint: {}", config.ai.chat_url);
    info!("  AI timeout: {}s", config.ai.timeout_secs);
    info!(
        "  Proxy: {}",
        config.proxy.effective_url().as_deref().unwrap_or("disabled")
    );
    info!("  Mention policy: {:?}", config.mention);

    platform::telegram::probe_api(&config).await;

    let bot = platform::telegram::build_bot(&config)?;
    let relay = Arc::new(Relay::from_config(&config)?);

    info!("Bot is starting...");
    platform::telegram::run(bot, relay).await?;

    Ok(())
}
