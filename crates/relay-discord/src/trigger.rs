use relay_core::config::DiscordConfig;
use serenity::model::channel::{Message, MessageType};
use serenity::model::id::UserId;

/// The facts about an incoming message that decide whether the bot answers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Trigger {
    pub from_bot: bool,
    /// Regular message, inline reply or thread starter.
    pub conversational: bool,
    pub has_content: bool,
    pub is_dm: bool,
    pub mentions_bot: bool,
    pub replies_to_bot: bool,
}

impl Trigger {
    pub fn from_message(msg: &Message, bot_id: UserId) -> Self {
        Self {
            from_bot: msg.author.bot,
            conversational: matches!(
                msg.kind,
                MessageType::Regular | MessageType::InlineReply | MessageType::ThreadStarterMessage
            ),
            has_content: !msg.content.trim().is_empty() || !msg.attachments.is_empty(),
            is_dm: msg.guild_id.is_none(),
            mentions_bot: msg.mentions_user_id(bot_id),
            replies_to_bot: msg
                .referenced_message
                .as_ref()
                .is_some_and(|r| r.author.id == bot_id),
        }
    }
}

/// Whether a message with these facts starts a turn.
///
/// Bots are never answered. In guilds a mention or a reply to the bot is
/// required unless `require_mention` is off; DMs are answered when allowed.
pub fn should_respond(trigger: &Trigger, config: &DiscordConfig) -> bool {
    if trigger.from_bot || !trigger.conversational || !trigger.has_content {
        return false;
    }
    if trigger.is_dm {
        return config.dm_allowed;
    }
    !config.require_mention || trigger.mentions_bot || trigger.replies_to_bot
}

/// Replace raw `<@id>` / `<@!id>` mentions with `@name` so the model sees
/// readable names.
pub fn resolve_mentions<'a>(
    content: &str,
    users: impl IntoIterator<Item = (u64, &'a str)>,
) -> String {
    let mut out = content.to_string();
    for (id, name) in users {
        let readable = format!("@{name}");
        out = out
            .replace(&format!("<@{id}>"), &readable)
            .replace(&format!("<@!{id}>"), &readable);
    }
    out
}
