use std::sync::{Arc, OnceLock};

use chrono::Utc;
use relay_agent::AgentRuntime;
use relay_core::config::DiscordConfig;
use relay_delivery::{ChannelSession, ChunkSink, SessionRegistry, TypingHandle};
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::UserId;
use serenity::prelude::{Context, EventHandler};
use tracing::{debug, info, warn};

use crate::context::{fetch_history, system_context, to_conversation, ChannelDescription};
use crate::send::DiscordSink;
use crate::trigger::{should_respond, Trigger};

/// Who the bot is, learned from the `ready` event.
#[derive(Debug, Clone)]
pub struct BotIdentity {
    pub id: UserId,
    pub name: String,
}

/// Serenity event handler wired to the agent runtime.
pub struct DiscordHandler {
    pub runtime: Arc<AgentRuntime>,
    pub sessions: Arc<SessionRegistry>,
    pub config: DiscordConfig,
    pub identity: OnceLock<BotIdentity>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.identity
            .set(BotIdentity {
                id: ready.user.id,
                name: ready.user.name.clone(),
            })
            .ok();
        info!(name = %ready.user.name, guilds = ready.guilds.len(), "Discord bot connected");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        // Every message counts for reply threading, the bot's own included.
        let session = self.sessions.session(&msg.channel_id.to_string());
        session.observe_message(msg.id.get());

        let Some(bot) = self.identity.get().cloned() else {
            return;
        };
        if !should_respond(&Trigger::from_message(&msg, bot.id), &self.config) {
            return;
        }

        debug!(
            channel = %msg.channel_id,
            author = %msg.author.name,
            message_id = %msg.id,
            "message accepted"
        );

        let channel = describe_channel(&ctx, &msg);
        tokio::spawn(run_channel_turn(
            Arc::clone(&self.runtime),
            Arc::clone(&ctx.http),
            session,
            msg,
            bot,
            channel,
            self.config.context_messages,
        ));
    }
}

/// Answer `msg` once the channel's previous turn has finished.
async fn run_channel_turn(
    runtime: Arc<AgentRuntime>,
    http: Arc<Http>,
    session: Arc<ChannelSession>,
    msg: Message,
    bot: BotIdentity,
    channel: ChannelDescription,
    context_messages: u8,
) {
    let turn = session.begin_turn().await;
    let sink: Arc<dyn ChunkSink> = Arc::new(DiscordSink::new(
        Arc::clone(&http),
        msg.channel_id,
        msg.id,
        Arc::clone(turn.session()),
    ));

    // Typing shows from the moment the turn starts, context fetch included.
    let entries = TypingHandle::during(
        Arc::clone(&sink),
        runtime.delivery().typing_interval(),
        fetch_history(&http, &msg, context_messages),
    )
    .await;
    let messages = to_conversation(&entries, bot.id.get());
    let system = system_context(Utc::now(), &channel, &bot.name);

    let outcome = runtime.respond(&system, messages, sink).await;
    match &outcome.generation {
        Ok(generation) => info!(
            channel = %msg.channel_id,
            turn = %outcome.turn_id,
            model = %generation.model,
            tokens_in = generation.tokens_in,
            tokens_out = generation.tokens_out,
            chunks = outcome.delivery.sent.len(),
            "reply delivered"
        ),
        Err(e) => warn!(
            channel = %msg.channel_id,
            turn = %outcome.turn_id,
            error = %e,
            "reply aborted"
        ),
    }
}

fn describe_channel(ctx: &Context, msg: &Message) -> ChannelDescription {
    match msg.guild_id {
        Some(guild_id) => {
            let (server, channel) = ctx
                .cache
                .guild(guild_id)
                .map(|g| {
                    (
                        g.name.clone(),
                        g.channels.get(&msg.channel_id).map(|c| c.name.clone()),
                    )
                })
                .unwrap_or_default();
            ChannelDescription::Guild {
                server,
                channel: channel.unwrap_or_else(|| msg.channel_id.to_string()),
            }
        }
        None => ChannelDescription::Direct {
            user: msg
                .author
                .global_name
                .clone()
                .unwrap_or_else(|| msg.author.name.clone()),
        },
    }
}
