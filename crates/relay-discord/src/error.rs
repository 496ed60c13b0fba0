/// Errors produced while setting up the Discord connection.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("Discord client error: {0}")]
    Client(#[from] serenity::Error),

    #[error("channels.discord.bot_token is empty")]
    NoToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serenity_errors_convert() {
        let err: DiscordError = serenity::Error::Other("gateway closed").into();
        assert!(matches!(err, DiscordError::Client(_)));
        assert_eq!(err.to_string(), "Discord client error: gateway closed");
    }
}
