//! Anthropic (Claude) provider implementation.

pub mod client;
pub mod inference;
pub mod types;

pub use client::AnthropicClient;
pub use inference::AnthropicInferenceProvider;
