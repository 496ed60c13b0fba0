use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_agent::openai::OpenAiProvider;
use relay_agent::tools::ToolSet;
use relay_agent::AgentRuntime;
use relay_core::RelayConfig;
use relay_discord::DiscordAdapter;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "relay-bot", about = "Discord LLM chat bot with paced, markdown-aware replies")]
struct Cli {
    /// Path to relay.toml (defaults to ~/.relay/relay.toml)
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "relay_bot=info,relay_delivery=info,relay_agent=info,relay_discord=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // explicit path > RELAY_CONFIG env > ~/.relay/relay.toml
    let config = RelayConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        RelayConfig::default()
    });

    let openai = config
        .providers
        .openai
        .clone()
        .context("no [providers.openai] section configured")?;
    info!(base_url = %openai.base_url, "LLM provider: OpenAI-compatible");
    let provider = OpenAiProvider::new(openai.api_key, Some(openai.base_url));

    let runtime = Arc::new(AgentRuntime::new(
        Box::new(provider),
        ToolSet::builtin(),
        config.agent.clone(),
        config.delivery.clone(),
    ));

    let discord = config
        .channels
        .discord
        .as_ref()
        .context("no [channels.discord] section configured")?;
    let adapter = DiscordAdapter::new(discord, runtime)?;

    info!(
        max_chunk_length = config.delivery.max_chunk_length,
        min_send_interval_ms = config.delivery.min_send_interval_ms,
        "relay-bot starting"
    );
    adapter.run().await;
    Ok(())
}
