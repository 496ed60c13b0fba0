//! Markdown-aware chunking and paced delivery of a growing model response.

pub mod buffer;
pub mod error;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod split;
pub mod typing;

pub use buffer::{output_buffer, BufferReader, BufferWriter, StreamStatus};
pub use error::DeliveryError;
pub use scheduler::{DeliveryReport, DeliveryScheduler, SentChunk, TurnState};
pub use session::{ChannelSession, SessionRegistry, TurnGuard};
pub use sink::ChunkSink;
pub use split::{settled_chunks, split_markdown};
pub use typing::TypingHandle;
