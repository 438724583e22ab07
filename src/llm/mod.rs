//! LLM module - completion interface and wire types
//!
//! The runtime talks to language models through the [`LlmClient`] trait: one
//! completion per call, returning either a tool-call decision or plain text.
//! [`OpenAiClient`] is the provided implementation for OpenAI-compatible
//! chat-completion APIs.

mod client;
pub(crate) mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{Completion, LlmClient, OpenAiClient, Reply};
pub use types::*;
