use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Discord's per-message character ceiling.
pub const DEFAULT_MAX_CHUNK_LENGTH: usize = 2000;
pub const DEFAULT_MIN_SEND_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SCHEDULER_TICK_MS: u64 = 100;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 2000;
pub const DEFAULT_TYPING_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 25;

/// Top-level config (relay.toml + RELAY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Chunking, pacing and retry knobs for one conversational turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Upper bound on characters per outbound message.
    #[serde(default = "default_max_chunk_length")]
    pub max_chunk_length: usize,
    /// Minimum gap between two sends of the same turn.
    #[serde(default = "default_min_send_interval_ms")]
    pub min_send_interval_ms: u64,
    /// While streaming, the buffer is re-split at most once per tick.
    #[serde(default = "default_scheduler_tick_ms")]
    pub scheduler_tick_ms: u64,
    /// Additional generation attempts after the first one fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_typing_interval_ms")]
    pub typing_interval_ms: u64,
    /// Fail a generation attempt that yields no stream event for this long.
    /// Unset disables the watchdog.
    #[serde(default)]
    pub stream_idle_timeout_ms: Option<u64>,
    /// Sent once in place of further output when generation is aborted.
    #[serde(default = "default_abort_message")]
    pub abort_message: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_chunk_length: DEFAULT_MAX_CHUNK_LENGTH,
            min_send_interval_ms: DEFAULT_MIN_SEND_INTERVAL_MS,
            scheduler_tick_ms: DEFAULT_SCHEDULER_TICK_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            typing_interval_ms: DEFAULT_TYPING_INTERVAL_MS,
            stream_idle_timeout_ms: None,
            abort_message: default_abort_message(),
        }
    }
}

impl DeliveryConfig {
    pub fn min_send_interval(&self) -> Duration {
        Duration::from_millis(self.min_send_interval_ms)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_millis(self.typing_interval_ms)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Operator-supplied instructions, placed before the generated context header.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on generate → tool calls → generate rounds per turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: None,
            max_tokens: default_max_tokens(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// When true, guild messages only start a turn if they mention or reply to the bot.
    #[serde(default = "bool_true")]
    pub require_mention: bool,
    /// When true, direct messages (DMs) are accepted.
    #[serde(default = "bool_true")]
    pub dm_allowed: bool,
    /// How many earlier channel messages are sent to the model as context.
    #[serde(default = "default_context_messages")]
    pub context_messages: u8,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            require_mention: true,
            dm_allowed: true,
            context_messages: default_context_messages(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_max_chunk_length() -> usize {
    DEFAULT_MAX_CHUNK_LENGTH
}
fn default_min_send_interval_ms() -> u64 {
    DEFAULT_MIN_SEND_INTERVAL_MS
}
fn default_scheduler_tick_ms() -> u64 {
    DEFAULT_SCHEDULER_TICK_MS
}
fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}
fn default_typing_interval_ms() -> u64 {
    DEFAULT_TYPING_INTERVAL_MS
}
fn default_abort_message() -> String {
    "Error: the language model request failed after multiple attempts. Please try again later."
        .to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_context_messages() -> u8 {
    20
}

impl RelayConfig {
    /// Load config from a TOML file with RELAY_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `RELAY_DELIVERY__MIN_SEND_INTERVAL_MS=1500`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        tracing::debug!(path = %path, "loading relay config");

        let config: RelayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_defaults_match_channel_limits() {
        let d = DeliveryConfig::default();
        assert_eq!(d.max_chunk_length, 2000);
        assert_eq!(d.min_send_interval(), Duration::from_millis(1000));
        assert_eq!(d.scheduler_tick(), Duration::from_millis(100));
        assert_eq!(d.max_retries, 3);
        assert_eq!(d.retry_backoff(), Duration::from_millis(2000));
        assert_eq!(d.typing_interval(), Duration::from_millis(5000));
        assert!(d.stream_idle_timeout().is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: RelayConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [delivery]
                min_send_interval_ms = 1500

                [channels.discord]
                bot_token = "abc"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.delivery.min_send_interval_ms, 1500);
        assert_eq!(config.delivery.max_chunk_length, 2000);
        assert_eq!(config.agent.max_tool_rounds, 25);
        let discord = config.channels.discord.unwrap();
        assert_eq!(discord.bot_token, "abc");
        assert!(discord.require_mention);
        assert_eq!(discord.context_messages, 20);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = RelayConfig::load(Some("/nonexistent/relay.toml")).unwrap();
        assert!(config.providers.openai.is_none());
        assert_eq!(config.delivery.max_retries, 3);
    }
}
