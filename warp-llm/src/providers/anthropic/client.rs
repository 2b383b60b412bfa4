//! Anthropic Messages API client (spec §4.9).

use super::types::{ContentBlock, Message, MessageRequest, MessageResponse, StreamEvent};
use crate::providers::RateLimiter;
use crate::{LlmChunk, LlmChunkStream, LlmClient, LlmCompletionRequest, LlmCompletionResponse};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use warp_core::LlmError;

const PROVIDER: &str = "anthropic";

/// Rate-limited HTTP client for Anthropic's Messages API.
pub struct AnthropicClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            model: model.into(),
            rate_limiter: RateLimiter::new(requests_per_minute),
        }
    }

    fn to_wire_request(&self, request: &LlmCompletionRequest, stream: bool) -> MessageRequest {
        MessageRequest {
            model: self.model.clone(),
            system: request.system.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| Message {
                    role: match m.role {
                        crate::LlmRole::User => "user".to_string(),
                        crate::LlmRole::Assistant => "assistant".to_string(),
                    },
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        }
    }

    async fn classify_error(response: reqwest::Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<super::types::ApiError>(&body)
            .map(|e: super::types::ApiError| e.error.message)
            .unwrap_or(body);

        match status {
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_ms: 1000,
            },
            other => LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: other.as_u16() as i32,
                message,
            },
        }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResponse, LlmError> {
        let _permit = self.rate_limiter.acquire().await;
        let body = self.to_wire_request(request, false);

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: 0,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let parsed: MessageResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        let content = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmCompletionResponse {
            content,
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
        })
    }

    async fn complete_streaming(&self, request: &LlmCompletionRequest) -> Result<LlmChunkStream, LlmError> {
        let _permit = self.rate_limiter.acquire().await;
        let body = self.to_wire_request(request, true);

        let response = self
            .http
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: 0,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Self::classify_error(response).await);
        }

        let byte_stream = response.bytes_stream();
        let chunk_stream = byte_stream
            .scan(String::new(), |buffer, bytes| {
                let events = match bytes {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        drain_sse_events(buffer)
                    }
                    Err(e) => {
                        return futures_util::future::ready(Some(vec![Err(LlmError::RequestFailed {
                            provider: PROVIDER.to_string(),
                            status: 0,
                            message: e.to_string(),
                        })]));
                    }
                };
                futures_util::future::ready(Some(events))
            })
            .flat_map(futures_util::stream::iter);

        Ok(Box::pin(chunk_stream))
    }
}

/// Pull complete `data: {...}\n\n` frames out of `buffer`, leaving any
/// trailing partial frame for the next chunk of bytes. Returns one
/// `LlmChunk` per `content_block_delta` event; other event kinds (message
/// start/stop, pings) are parsed and discarded.
fn drain_sse_events(buffer: &mut String) -> Vec<Result<LlmChunk, LlmError>> {
    let mut out = Vec::new();
    while let Some(boundary) = buffer.find("\n\n") {
        let frame: String = buffer.drain(..boundary + 2).collect();
        for line in frame.lines() {
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            match serde_json::from_str::<StreamEvent>(data) {
                Ok(StreamEvent::ContentBlockDelta { delta }) => {
                    if !delta.text.is_empty() {
                        out.push(Ok(LlmChunk { content: delta.text }));
                    }
                }
                Ok(_) => {}
                Err(_) => {}
            }
        }
    }
    out
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}
