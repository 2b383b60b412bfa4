//! OpenAI Chat Completions API adapter.

mod client;
mod types;

pub use client::OpenAIClient;
