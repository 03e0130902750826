// SPDX-License-Identifier: MIT OR Apache-2.0
//! AWS Bedrock (Anthropic Messages API) provider: lowers IR conversations
//! into the `InvokeModel` request shape and raises the response back into
//! [`fmf_runtime::Completion`].
//!
//! Calls go through a configurable HTTP endpoint rather than the AWS SDK's
//! SigV4-signing client, so this adapter can be pointed at a signing proxy
//! or a local mock; see `DESIGN.md` for the reasoning.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod wire;

pub use wire::{lower_conversation, WireMessage, WireRequest, WireResponse, WireStreamEvent};

use async_trait::async_trait;
use fmf_core::ir::IrConversation;
use fmf_error::FmfError;
use fmf_ratelimit::{RateLimitConfig, TokenBucket};
use fmf_runtime::{Completion, CompletionParams, InferenceProvider, TokenSink};
use fmf_split::estimate_tokens;
use wire::{WireResponseBlock, WireStreamDelta};

/// Whether a Bedrock provider attempts `invoke-model-with-response-stream`.
/// Disabled by default since Bedrock streaming support varies by model and
/// region; mirrors the original `FMF_EXPERIMENTAL_STREAMING` opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamingSupport {
    /// Only non-streaming `invoke-model` calls are made.
    Disabled,
    /// `invoke-model-with-response-stream` is used for `auto`/`stream` modes.
    Enabled,
}

/// Configuration for a Bedrock Anthropic-messages deployment.
#[derive(Debug, Clone)]
pub struct BedrockConfig {
    /// Base endpoint the adapter calls (a Bedrock-runtime-compatible proxy).
    pub endpoint: String,
    /// Bedrock model id (e.g. `anthropic.claude-3-5-sonnet-20241022-v2:0`).
    pub model_id: String,
    /// Bearer credential forwarded as an `Authorization` header.
    pub api_key: String,
    /// Requests per second allowed against this model.
    pub rate_per_sec: f64,
    /// Whether streaming calls are attempted.
    pub streaming: StreamingSupport,
}

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

/// A Bedrock Anthropic-messages provider.
pub struct BedrockProvider {
    config: BedrockConfig,
    client: reqwest::Client,
    limiter: TokenBucket,
}

impl BedrockProvider {
    /// Construct a provider over `config`, with its own per-model rate limiter.
    #[must_use]
    pub fn new(config: BedrockConfig) -> Self {
        let limiter = TokenBucket::new(RateLimitConfig { capacity: config.rate_per_sec, refill_per_sec: config.rate_per_sec });
        Self { config, client: reqwest::Client::new(), limiter }
    }

    fn invoke_url(&self) -> String {
        format!("{}/model/{}/invoke", self.config.endpoint.trim_end_matches('/'), self.config.model_id)
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/model/{}/invoke-with-response-stream",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model_id
        )
    }

    fn build_request(&self, conversation: &IrConversation, params: &CompletionParams) -> WireRequest {
        let (system, messages) = lower_conversation(conversation);
        WireRequest {
            anthropic_version: ANTHROPIC_VERSION.to_string(),
            messages,
            system,
            temperature: params.temperature,
            max_tokens: params.max_tokens.unwrap_or(4096),
        }
    }

    fn estimate_prompt_tokens(conversation: &IrConversation) -> u64 {
        conversation.messages.iter().map(|m| estimate_tokens(&m.text_content()) as u64).sum()
    }
}

#[async_trait]
impl InferenceProvider for BedrockProvider {
    fn name(&self) -> &str {
        "aws_bedrock"
    }

    fn supports_streaming(&self) -> bool {
        self.config.streaming == StreamingSupport::Enabled
    }

    async fn complete(&self, conversation: &IrConversation, params: &CompletionParams) -> Result<Completion, FmfError> {
        self.limiter.acquire().await;
        let request = self.build_request(conversation, params);

        let response = self
            .client
            .post(self.invoke_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FmfError::provider(format!("request to aws_bedrock failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FmfError::provider(format!("aws_bedrock returned status {status}"))
                .with_context("status_code", u64::from(status.as_u16())));
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| FmfError::provider(format!("failed to parse aws_bedrock response: {e}")))?;

        let text = body
            .content
            .iter()
            .filter_map(|block| match block {
                WireResponseBlock::Text { text } => Some(text.as_str()),
                WireResponseBlock::Other => None,
            })
            .collect::<String>();

        let prompt_tokens = body.usage.as_ref().map_or_else(|| Self::estimate_prompt_tokens(conversation), |u| u.input_tokens);
        let completion_tokens = body.usage.as_ref().map_or_else(|| estimate_tokens(&text) as u64, |u| u.output_tokens);

        Ok(Completion {
            text,
            model: Some(self.config.model_id.clone()),
            stop_reason: body.stop_reason,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        })
    }

    async fn complete_streaming(
        &self,
        conversation: &IrConversation,
        params: &CompletionParams,
        on_token: TokenSink,
    ) -> Result<Completion, FmfError> {
        if self.config.streaming != StreamingSupport::Enabled {
            return Err(FmfError::provider("streaming is not enabled for this aws_bedrock deployment"));
        }

        self.limiter.acquire().await;
        let request = self.build_request(conversation, params);

        let response = self
            .client
            .post(self.stream_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FmfError::provider(format!("streaming request to aws_bedrock failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FmfError::provider(format!("aws_bedrock stream returned status {status}"))
                .with_context("status_code", u64::from(status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FmfError::provider(format!("failed to read aws_bedrock stream body: {e}")))?;
        let body = String::from_utf8_lossy(&bytes);

        let mut text = String::new();
        let mut stop_reason = None;
        let mut usage = None;

        for line in body.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(event) = serde_json::from_str::<WireStreamEvent>(trimmed) else { continue };
            match event {
                WireStreamEvent::ContentBlockDelta { delta: WireStreamDelta::TextDelta { text: fragment } } => {
                    if !fragment.is_empty() {
                        on_token(&fragment);
                        text.push_str(&fragment);
                    }
                }
                WireStreamEvent::MessageDelta { delta, usage: event_usage } => {
                    stop_reason = delta.stop_reason.or(stop_reason);
                    usage = event_usage.or(usage);
                }
                _ => {}
            }
        }

        if text.is_empty() {
            return Err(FmfError::provider("aws_bedrock stream produced no content"));
        }

        let prompt_tokens = usage.as_ref().map_or_else(|| Self::estimate_prompt_tokens(conversation), |u| u.input_tokens);
        let completion_tokens = usage.as_ref().map_or_else(|| estimate_tokens(&text) as u64, |u| u.output_tokens);

        Ok(Completion {
            text,
            model: Some(self.config.model_id.clone()),
            stop_reason,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmf_core::ir::{IrMessage, IrRole};
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String, streaming: StreamingSupport) -> BedrockConfig {
        BedrockConfig {
            endpoint,
            model_id: "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string(),
            api_key: "token".to_string(),
            rate_per_sec: 1000.0,
            streaming,
        }
    }

    #[tokio::test]
    async fn complete_parses_non_streaming_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/model/.*/invoke$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hi there"}],
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 4, "output_tokens": 2}
            })))
            .mount(&server)
            .await;

        let provider = BedrockProvider::new(config(server.uri(), StreamingSupport::Disabled));
        let conversation = IrConversation::new().push(IrMessage::text(IrRole::User, "hi"));
        let completion = provider.complete(&conversation, &CompletionParams::default()).await.unwrap();
        assert_eq!(completion.text, "hi there");
        assert_eq!(completion.prompt_tokens, Some(4));
    }

    #[tokio::test]
    async fn streaming_disabled_rejects_stream_calls() {
        let provider = BedrockProvider::new(config("http://localhost:0".to_string(), StreamingSupport::Disabled));
        assert!(!provider.supports_streaming());
    }

    #[tokio::test]
    async fn complete_streaming_accumulates_text_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n",
            "{\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\" there\"}}\n",
            "{\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"input_tokens\":4,\"output_tokens\":3}}\n",
        );
        Mock::given(method("POST"))
            .and(path_regex(r"^/model/.*/invoke-with-response-stream$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let provider = BedrockProvider::new(config(server.uri(), StreamingSupport::Enabled));
        let conversation = IrConversation::new().push(IrMessage::text(IrRole::User, "hi"));
        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = std::sync::Arc::clone(&received);
        let sink: TokenSink = std::sync::Arc::new(move |t: &str| received_clone.lock().unwrap().push(t.to_string()));

        let completion = provider.complete_streaming(&conversation, &CompletionParams::default(), sink).await.unwrap();
        assert_eq!(completion.text, "Hi there");
        assert_eq!(completion.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(*received.lock().unwrap(), vec!["Hi".to_string(), " there".to_string()]);
    }
}
