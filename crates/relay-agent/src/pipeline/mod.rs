//! Channel-agnostic turn processing: generation into a buffer, joined with
//! paced delivery of that buffer.

pub mod generate;
pub mod turn;

pub use generate::{generate_into, tool_annotation, Generation, GenerationPolicy};
pub use turn::{run_turn, TurnOutcome};
