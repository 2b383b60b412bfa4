//! Concrete `LlmClient` adapters (spec §4.9).
//!
//! Each provider submodule wraps one vendor's HTTP API behind the same
//! rate-limiting shape: a `reqwest::Client`, a `tokio::sync::Semaphore`
//! bounding concurrent in-flight requests, and a minimum-inter-request
//! interval guard so a misconfigured `requests_per_minute` can't hammer the
//! provider.

pub mod anthropic;
pub mod openai;

mod rate_limit;

pub use anthropic::AnthropicClient;
pub use openai::OpenAIClient;
pub use rate_limit::RateLimiter;
