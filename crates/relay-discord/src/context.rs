//! Conversation context for a turn: recent channel history rendered as chat
//! messages, plus the channel-specific part of the system prompt.

use chrono::{DateTime, Utc};
use relay_agent::Message;
use serenity::builder::GetMessages;
use serenity::http::Http;
use serenity::model::channel::Message as DiscordMessage;
use tracing::warn;

use crate::trigger::resolve_mentions;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// One channel message, reduced to what the model is shown.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    pub author_id: u64,
    pub author_name: String,
    pub message_id: u64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub reply_to: Option<QuotedMessage>,
}

/// The message an entry replies to.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotedMessage {
    pub author_name: String,
    pub message_id: u64,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// Where the conversation takes place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelDescription {
    Guild { server: String, channel: String },
    Direct { user: String },
}

impl ContextEntry {
    pub fn from_message(msg: &DiscordMessage) -> Self {
        Self {
            author_id: msg.author.id.get(),
            author_name: display_name(msg),
            message_id: msg.id.get(),
            timestamp: timestamp_of(msg),
            content: readable_content(msg),
            reply_to: msg.referenced_message.as_deref().map(|r| QuotedMessage {
                author_name: display_name(r),
                message_id: r.id.get(),
                timestamp: timestamp_of(r),
                content: readable_content(r),
            }),
        }
    }

    /// Render as the model sees it: optional quoted reply, then a
    /// `Name (Message ID: id) - timestamp:` header and the content.
    pub fn render(&self) -> String {
        let header = format!(
            "{} (Message ID: {}) - {}:\n{}",
            self.author_name,
            self.message_id,
            format_timestamp(self.timestamp),
            self.content
        );
        match &self.reply_to {
            Some(quoted) => format!("{}\n\n{}", quoted.render(), header),
            None => header,
        }
    }
}

impl QuotedMessage {
    fn render(&self) -> String {
        let quoted: Vec<String> = self.content.lines().map(|l| format!("> {l}")).collect();
        format!(
            "Replying to {} (Message ID: {}) - {}:\n{}",
            self.author_name,
            self.message_id,
            format_timestamp(self.timestamp),
            quoted.join("\n")
        )
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Map history onto chat roles. The bot's own messages become assistant
/// turns with their raw content; everyone else's become rendered user turns.
pub fn to_conversation(entries: &[ContextEntry], bot_id: u64) -> Vec<Message> {
    entries
        .iter()
        .map(|entry| {
            if entry.author_id == bot_id {
                Message::assistant(entry.content.clone())
            } else {
                Message::user(entry.render())
            }
        })
        .collect()
}

/// Channel-specific system prompt.
pub fn system_context(now: DateTime<Utc>, channel: &ChannelDescription, bot_name: &str) -> String {
    let location = match channel {
        ChannelDescription::Guild { server, channel } => {
            format!("Server: {server}\nChannel: #{channel}")
        }
        ChannelDescription::Direct { user } => format!("Channel: DM with {user}"),
    };
    format!(
        "Current time: {}\n{}\n\n\
         You are {} chatting on Discord with one or more users. Each user message \
         starts with a header giving the author's name, the message ID and a timestamp, \
         and may quote the message it replies to. Do not include such headers in your \
         replies. Markdown tables, embedded images and LaTeX are not rendered, so avoid them.\n\n\
         Use tools as their descriptions instruct, or when the user asks you to. \
         Users can see when you use a tool.",
        format_timestamp(now),
        location,
        bot_name
    )
}

/// Fetch up to `limit` messages before `trigger`, oldest first, followed by
/// the trigger itself. A failed fetch degrades to the trigger alone.
pub async fn fetch_history(http: &Http, trigger: &DiscordMessage, limit: u8) -> Vec<ContextEntry> {
    let mut history = Vec::new();
    if limit > 0 {
        let request = GetMessages::new().before(trigger.id).limit(limit);
        match trigger.channel_id.messages(http, request).await {
            Ok(messages) => history = messages,
            Err(e) => warn!(
                channel = %trigger.channel_id,
                error = %e,
                "failed to fetch channel history, continuing without it"
            ),
        }
    }

    // Discord returns newest first.
    history.reverse();
    history
        .iter()
        .chain(std::iter::once(trigger))
        .map(ContextEntry::from_message)
        .filter(|entry| !entry.content.trim().is_empty())
        .collect()
}

fn display_name(msg: &DiscordMessage) -> String {
    msg.member
        .as_ref()
        .and_then(|m| m.nick.clone())
        .or_else(|| msg.author.global_name.clone())
        .unwrap_or_else(|| msg.author.name.clone())
}

fn timestamp_of(msg: &DiscordMessage) -> DateTime<Utc> {
    DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0).unwrap_or_default()
}

fn readable_content(msg: &DiscordMessage) -> String {
    let mut content = resolve_mentions(
        &msg.content,
        msg.mentions.iter().map(|u| {
            (
                u.id.get(),
                u.global_name.as_deref().unwrap_or(u.name.as_str()),
            )
        }),
    );
    for attachment in &msg.attachments {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&format!("[Attachment: {}]", attachment.filename));
    }
    content
}
