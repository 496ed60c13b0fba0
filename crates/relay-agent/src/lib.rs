//! Generation side of a turn: the LLM provider abstraction, the streaming
//! OpenAI-compatible client, built-in tools and the pipeline that feeds a
//! delivery buffer.

pub mod openai;
pub mod pipeline;
pub mod provider;
pub mod runtime;
pub mod stream;
pub mod tools;

pub use provider::{ChatRequest, LlmProvider, Message, ProviderError, Role};
pub use pipeline::TurnOutcome;
pub use runtime::AgentRuntime;
pub use stream::StreamEvent;
