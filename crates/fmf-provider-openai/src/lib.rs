// SPDX-License-Identifier: MIT OR Apache-2.0
//! Azure/OpenAI Chat Completions provider: lowers IR conversations into
//! the Chat Completions wire format, calls the deployment endpoint, and
//! raises the response back into [`fmf_runtime::Completion`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod wire;

pub use wire::{lower_conversation, WireChunk, WireContent, WireMessage, WireRequest, WireResponse};

use async_trait::async_trait;
use fmf_core::ir::IrConversation;
use fmf_error::FmfError;
use fmf_ratelimit::{RateLimitConfig, TokenBucket};
use fmf_runtime::{Completion, CompletionParams, InferenceProvider, TokenSink};
use fmf_split::estimate_tokens;

/// Configuration for an Azure/OpenAI Chat Completions deployment.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// API version query parameter (Azure) or `"v1"` for plain OpenAI.
    pub api_version: String,
    /// Deployment or model name.
    pub deployment: String,
    /// API key, sent as the `api-key` header.
    pub api_key: String,
    /// Requests per second allowed against this deployment.
    pub rate_per_sec: f64,
}

/// An Azure/OpenAI Chat Completions provider.
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: reqwest::Client,
    limiter: TokenBucket,
}

impl OpenAiProvider {
    /// Construct a provider over `config`, with its own per-deployment
    /// rate limiter.
    #[must_use]
    pub fn new(config: OpenAiConfig) -> Self {
        let limiter = TokenBucket::new(RateLimitConfig { capacity: config.rate_per_sec, refill_per_sec: config.rate_per_sec });
        Self { config, client: reqwest::Client::new(), limiter }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version
        )
    }

    fn estimate_prompt_tokens(conversation: &IrConversation) -> u64 {
        conversation.messages.iter().map(|m| estimate_tokens(&m.text_content()) as u64).sum()
    }
}

#[async_trait]
impl InferenceProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "azure_openai"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, conversation: &IrConversation, params: &CompletionParams) -> Result<Completion, FmfError> {
        self.limiter.acquire().await;

        let request = WireRequest {
            messages: lower_conversation(conversation),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: false,
        };

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FmfError::provider(format!("request to azure_openai failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FmfError::provider(format!("azure_openai returned status {status}"))
                .with_context("status_code", u64::from(status.as_u16())));
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| FmfError::provider(format!("failed to parse azure_openai response: {e}")))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| FmfError::provider("azure_openai response had no choices"))?;
        let text = choice.message.content.unwrap_or_default();
        let prompt_tokens = body.usage.as_ref().map_or_else(|| Self::estimate_prompt_tokens(conversation), |u| u.prompt_tokens);
        let completion_tokens = body.usage.as_ref().map_or_else(|| estimate_tokens(&text) as u64, |u| u.completion_tokens);

        Ok(Completion {
            text,
            model: body.model,
            stop_reason: choice.finish_reason,
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
        self.limiter.acquire().await;

        let request = WireRequest {
            messages: lower_conversation(conversation),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream: true,
        };

        let response = self
            .client
            .post(self.url())
            .header("api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| FmfError::provider(format!("streaming request to azure_openai failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FmfError::provider(format!("azure_openai stream returned status {status}"))
                .with_context("status_code", u64::from(status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FmfError::provider(format!("failed to read azure_openai stream body: {e}")))?;
        let body = String::from_utf8_lossy(&bytes);

        let mut text = String::new();
        let mut model = None;
        let mut finish_reason = None;
        let mut usage = None;

        for line in body.lines() {
            let Some(data) = line.strip_prefix("data:") else { continue };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            let Ok(chunk) = serde_json::from_str::<WireChunk>(data) else { continue };
            model = chunk.model.or(model);
            usage = chunk.usage.or(usage);
            for choice in chunk.choices {
                if let Some(delta) = choice.delta.content {
                    if !delta.is_empty() {
                        on_token(&delta);
                        text.push_str(&delta);
                    }
                }
                finish_reason = choice.finish_reason.or(finish_reason);
            }
        }

        if text.is_empty() {
            return Err(FmfError::provider("azure_openai stream produced no content"));
        }

        let prompt_tokens = usage.as_ref().map_or_else(|| Self::estimate_prompt_tokens(conversation), |u| u.prompt_tokens);
        let completion_tokens = usage.as_ref().map_or_else(|| estimate_tokens(&text) as u64, |u| u.completion_tokens);

        Ok(Completion {
            text,
            model,
            stop_reason: finish_reason,
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmf_core::ir::{IrMessage, IrRole};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String) -> OpenAiConfig {
        OpenAiConfig {
            endpoint,
            api_version: "2024-02-01".to_string(),
            deployment: "gpt-4o".to_string(),
            api_key: "test-key".to_string(),
            rate_per_sec: 1000.0,
        }
    }

    #[tokio::test]
    async fn complete_parses_non_streaming_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(header("api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-4o",
                "choices": [{"message": {"content": "hello there"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 2}
            })))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(config(server.uri()));
        let conversation = IrConversation::new().push(IrMessage::text(IrRole::User, "hi"));
        let completion = provider.complete(&conversation, &CompletionParams::default()).await.unwrap();
        assert_eq!(completion.text, "hello there");
        assert_eq!(completion.prompt_tokens, Some(3));
    }

    #[tokio::test]
    async fn complete_maps_non_success_status_to_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(config(server.uri()));
        let conversation = IrConversation::new().push(IrMessage::text(IrRole::User, "hi"));
        let err = provider.complete(&conversation, &CompletionParams::default()).await.unwrap_err();
        assert_eq!(err.kind, fmf_error::FmfErrorKind::Provider);
        assert_eq!(err.context["status_code"], 429);
    }

    #[tokio::test]
    async fn complete_streaming_accumulates_deltas_and_invokes_sink() {
        let server = MockServer::start().await;
        let sse_body = concat!(
            "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"He\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body).insert_header("content-type", "text/event-stream"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(config(server.uri()));
        let conversation = IrConversation::new().push(IrMessage::text(IrRole::User, "hi"));
        let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_clone = std::sync::Arc::clone(&received);
        let sink: TokenSink = std::sync::Arc::new(move |t: &str| received_clone.lock().unwrap().push(t.to_string()));

        let completion = provider.complete_streaming(&conversation, &CompletionParams::default(), sink).await.unwrap();
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.stop_reason.as_deref(), Some("stop"));
        assert_eq!(*received.lock().unwrap(), vec!["He".to_string(), "llo".to_string()]);
    }
}
