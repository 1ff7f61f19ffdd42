//! The sideman: everything between the quartet and the model.
//!
//! Owns the OpenAI-compatible streaming client, the rolling context of
//! recent playing, the prompt builder, and the continuous generation loop
//! that keeps parsed steps flowing into playback while the model is still
//! producing tokens.

pub mod client;
pub mod context;
pub mod generation;
pub mod prompt;
pub mod types;

pub use client::{LlmClient, LlmError, StreamOutcome};
pub use context::ContextBuffer;
pub use generation::{GenerationLoop, SessionSummary};
pub use prompt::PromptBuilder;
