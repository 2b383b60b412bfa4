//! Anthropic Messages API adapter.

mod client;
mod types;

pub use client::AnthropicClient;
