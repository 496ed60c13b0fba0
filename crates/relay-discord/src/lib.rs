pub mod adapter;
pub mod context;
pub mod error;
pub mod handler;
pub mod send;
pub mod trigger;

pub use adapter::DiscordAdapter;
pub use error::DiscordError;
pub use send::DiscordSink;
