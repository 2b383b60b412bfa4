//! OpenAI Chat Completions API client (spec §4.9).

use super::types::{CompletionRequest, CompletionResponse, Message, StreamChunk};
use crate::providers::RateLimiter;
use crate::{LlmChunk, LlmChunkStream, LlmClient, LlmCompletionRequest, LlmCompletionResponse};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use warp_core::LlmError;

const PROVIDER: &str = "openai";

/// Rate-limited HTTP client for OpenAI's Chat Completions API.
pub struct OpenAIClient {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
    rate_limiter: RateLimiter,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, requests_per_minute: u32) -> Self {
        Self {
            http: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: model.into(),
            rate_limiter: RateLimiter::new(requests_per_minute),
        }
    }

    fn to_wire_request(&self, request: &LlmCompletionRequest, stream: bool) -> CompletionRequest {
        let mut messages = vec![Message {
            role: "system".to_string(),
            content: request.system.clone(),
        }];
        messages.extend(request.messages.iter().map(|m| Message {
            role: match m.role {
                crate::LlmRole::User => "user".to_string(),
                crate::LlmRole::Assistant => "assistant".to_string(),
            },
            content: m.content.clone(),
        }));

        CompletionRequest {
            model: self.model.clone(),
            messages,
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
impl LlmClient for OpenAIClient {
    async fn complete(
        &self,
        request: &LlmCompletionRequest,
    ) -> Result<LlmCompletionResponse, LlmError> {
        let _permit = self.rate_limiter.acquire().await;
        let body = self.to_wire_request(request, false);

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
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

        let parsed: CompletionResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: e.to_string(),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response contained no choices".to_string(),
            })?;

        Ok(LlmCompletionResponse {
            content,
            input_tokens: parsed.usage.prompt_tokens,
            output_tokens: parsed.usage.completion_tokens,
        })
    }

    async fn complete_streaming(&self, request: &LlmCompletionRequest) -> Result<LlmChunkStream, LlmError> {
        let _permit = self.rate_limiter.acquire().await;
        let body = self.to_wire_request(request, true);

        let response = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
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

/// Pull complete `data: {...}\n\n` frames out of `buffer`. `data: [DONE]`
/// marks end of stream and is silently dropped, matching the OpenAI SSE
/// convention.
fn drain_sse_events(buffer: &mut String) -> Vec<Result<LlmChunk, LlmError>> {
    let mut out = Vec::new();
    while let Some(boundary) = buffer.find("\n\n") {
        let frame: String = buffer.drain(..boundary + 2).collect();
        for line in frame.lines() {
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                continue;
            }
            if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
                if let Some(choice) = chunk.choices.into_iter().next() {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            out.push(Ok(LlmChunk { content }));
                        }
                    }
                }
            }
        }
    }
    out
}

impl std::fmt::Debug for OpenAIClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_content_delta_and_ignores_done_marker() {
        let mut buffer = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
        );
        let events = drain_sse_events(&mut buffer);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().content, "hi");
        assert!(buffer.is_empty());
    }
}
