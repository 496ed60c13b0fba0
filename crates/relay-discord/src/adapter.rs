use std::sync::{Arc, OnceLock};
use std::time::Duration;

use relay_agent::AgentRuntime;
use relay_core::config::DiscordConfig;
use relay_delivery::SessionRegistry;
use serenity::model::gateway::GatewayIntents;
use serenity::Client;
use tracing::{debug, error, info, warn};

use crate::error::DiscordError;
use crate::handler::DiscordHandler;

const SESSION_EVICT_INTERVAL: Duration = Duration::from_secs(600);

/// Discord channel adapter.
///
/// Wraps a serenity `Client` and drives the event loop until the process exits.
/// Reconnects whenever the gateway drops. Channel sessions outlive reconnects.
pub struct DiscordAdapter {
    runtime: Arc<AgentRuntime>,
    sessions: Arc<SessionRegistry>,
    config: DiscordConfig,
}

impl DiscordAdapter {
    pub fn new(config: &DiscordConfig, runtime: Arc<AgentRuntime>) -> Result<Self, DiscordError> {
        if config.bot_token.trim().is_empty() {
            return Err(DiscordError::NoToken);
        }
        Ok(Self {
            runtime,
            sessions: Arc::new(SessionRegistry::new()),
            config: config.clone(),
        })
    }

    /// Connect to Discord and keep reconnecting whenever the gateway drops.
    ///
    /// Never returns.
    pub async fn run(self) {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        tokio::spawn(evict_idle_sessions(Arc::clone(&self.sessions)));

        loop {
            let mut client = loop {
                match self.build_client(intents).await {
                    Ok(c) => break c,
                    Err(e) => {
                        error!("Discord: connect failed ({e}), retrying in 30s");
                        tokio::time::sleep(Duration::from_secs(30)).await;
                    }
                }
            };

            info!("Discord: gateway connecting");
            if let Err(e) = client.start().await {
                warn!("Discord: gateway error ({e}), reconnecting in 5s");
            } else {
                info!("Discord: gateway stopped cleanly, reconnecting in 5s");
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn build_client(&self, intents: GatewayIntents) -> Result<Client, DiscordError> {
        let handler = DiscordHandler {
            runtime: Arc::clone(&self.runtime),
            sessions: Arc::clone(&self.sessions),
            config: self.config.clone(),
            identity: OnceLock::new(),
        };

        let client = Client::builder(&self.config.bot_token, intents)
            .event_handler(handler)
            .await?;
        Ok(client)
    }
}

async fn evict_idle_sessions(sessions: Arc<SessionRegistry>) {
    let mut interval = tokio::time::interval(SESSION_EVICT_INTERVAL);
    interval.tick().await;
    loop {
        interval.tick().await;
        let evicted = sessions.evict_idle();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "evicted idle channel sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_agent::openai::OpenAiProvider;
    use relay_agent::tools::ToolSet;
    use relay_core::config::{AgentConfig, DeliveryConfig};

    fn runtime() -> Arc<AgentRuntime> {
        Arc::new(AgentRuntime::new(
            Box::new(OpenAiProvider::new("test-key".into(), None)),
            ToolSet::new(),
            AgentConfig::default(),
            DeliveryConfig::default(),
        ))
    }

    #[test]
    fn blank_token_is_rejected() {
        let config = DiscordConfig {
            bot_token: "  ".into(),
            ..DiscordConfig::default()
        };
        assert!(matches!(
            DiscordAdapter::new(&config, runtime()),
            Err(DiscordError::NoToken)
        ));
    }

    #[test]
    fn configured_token_is_accepted() {
        let config = DiscordConfig {
            bot_token: "token".into(),
            ..DiscordConfig::default()
        };
        let adapter = DiscordAdapter::new(&config, runtime()).unwrap();
        assert!(adapter.sessions.is_empty());
    }
}
