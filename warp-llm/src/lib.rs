//! Provider-agnostic LLM completion client (spec §4.9, §5).
//!
//! The Designer and Optimizer stages consume a single narrow surface —
//! `complete` for the Designer's non-streaming structured-plan calls,
//! `complete_streaming` for the Optimizer's narrated diagnosis — and never
//! see which vendor answered. Concrete adapters live under `providers/`.

pub mod providers;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use warp_core::LlmError;

/// One turn of conversation sent to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

/// A completion request (spec §3: `LlmCompletionRequest`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletionRequest {
    pub system: String,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl LlmCompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<LlmMessage>, max_tokens: u32) -> Self {
        Self {
            system: system.into(),
            messages,
            max_tokens,
            temperature: None,
        }
    }
}

/// A completed, non-streaming response (spec §3: `LlmCompletionResponse`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A single chunk of a streamed completion, forwarded verbatim to the
/// session as `chunk { content }` (spec §4.9, §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmChunk {
    pub content: String,
}

/// A boxed stream of chunks; `Send` because it crosses into a spawned
/// session task.
pub type LlmChunkStream = BoxStream<'static, Result<LlmChunk, LlmError>>;

/// Provider-agnostic completion surface (spec §4.9). All downstream
/// components (Designer, Optimizer) depend on this trait, never on a
/// concrete provider — LLM non-determinism and vendor-specific wire
/// formats are contained entirely behind it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Non-streaming call: the Designer must see the whole structured plan
    /// before it can validate it, so it always uses this path.
    async fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResponse, LlmError>;

    /// Streaming call: the Optimizer's narrated diagnosis forwards chunks
    /// to the session as they arrive.
    async fn complete_streaming(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmChunkStream, LlmError>;
}

/// A deterministic in-memory client for tests: returns a fixed response (or
/// cycles through a scripted sequence) without touching the network.
pub struct MockLlmClient {
    responses: tokio::sync::Mutex<std::collections::VecDeque<String>>,
}

impl MockLlmClient {
    /// A client that always returns the same completion.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(std::collections::VecDeque::from([response.into()])),
        }
    }

    /// A client that returns each scripted response in order, then repeats
    /// the last one once exhausted. Used to test the Designer's retry loop
    /// (first response invalid, second response valid).
    pub fn scripted(responses: impl IntoIterator<Item = String>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(responses.into_iter().collect()),
        }
    }

    async fn next_response(&self) -> String {
        let mut queue = self.responses.lock().await;
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResponse, LlmError> {
        let content = self.next_response().await;
        Ok(LlmCompletionResponse {
            input_tokens: 0,
            output_tokens: content.len() as u32,
            content,
        })
    }

    async fn complete_streaming(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmChunkStream, LlmError> {
        let response = self.complete(request).await?;
        let chunks: Vec<Result<LlmChunk, LlmError>> = response
            .content
            .split_inclusive(' ')
            .map(|piece| Ok(LlmChunk { content: piece.to_string() }))
            .collect();
        Ok(Box::pin(tokio_stream::iter(chunks)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmCompletionRequest {
        LlmCompletionRequest::new(
            "you are a planner",
            vec![LlmMessage {
                role: LlmRole::User,
                content: "book a flight".to_string(),
            }],
            512,
        )
    }

    #[tokio::test]
    async fn mock_fixed_returns_same_content() {
        let client = MockLlmClient::fixed("hello world");
        let a = client.complete(&request()).await.unwrap();
        let b = client.complete(&request()).await.unwrap();
        assert_eq!(a.content, "hello world");
        assert_eq!(b.content, "hello world");
    }

    #[tokio::test]
    async fn mock_scripted_advances_then_repeats_last() {
        let client = MockLlmClient::scripted(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(client.complete(&request()).await.unwrap().content, "first");
        assert_eq!(client.complete(&request()).await.unwrap().content, "second");
        assert_eq!(client.complete(&request()).await.unwrap().content, "second");
    }

    #[tokio::test]
    async fn mock_streaming_reassembles_to_same_content() {
        use futures_util::StreamExt;
        let client = MockLlmClient::fixed("streamed response");
        let mut stream = client.complete_streaming(&request()).await.unwrap();
        let mut assembled = String::new();
        while let Some(chunk) = stream.next().await {
            assembled.push_str(&chunk.unwrap().content);
        }
        assert_eq!(assembled, "streamed response");
    }
}
