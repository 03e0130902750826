// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inference mode selection (`auto` / `regular` / `stream`), streaming
//! fallback, retry wrapping, and per-call telemetry capture, sitting on
//! top of a provider-neutral [`InferenceProvider`] trait.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use fmf_core::ir::IrConversation;
use fmf_error::FmfError;
use fmf_retry::{default_predicate, retry_async, RetryConfig};
use fmf_telemetry::Metrics;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// A callback invoked with each incremental token as a streamed completion
/// arrives. Implementations should be cheap; buffering is the caller's job.
pub type TokenSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Sampling parameters for a single completion request.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CompletionParams {
    /// Sampling temperature, if the provider supports it.
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
}

/// A normalized completion result, regardless of which provider produced it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Completion {
    /// The generated text.
    pub text: String,
    /// The model identifier that produced this completion.
    pub model: Option<String>,
    /// Why generation stopped (`"stop"`, `"length"`, `"tool_calls"`, ...).
    pub stop_reason: Option<String>,
    /// Prompt tokens billed, if reported.
    pub prompt_tokens: Option<u64>,
    /// Completion tokens billed, if reported.
    pub completion_tokens: Option<u64>,
}

/// Uniform access to a chat-completion-style provider. Implementations own
/// their own wire format and lower [`IrConversation`] into it.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// The provider's configured name, used in error messages and telemetry.
    fn name(&self) -> &str;

    /// Whether this provider can stream tokens incrementally.
    fn supports_streaming(&self) -> bool;

    /// Perform a single non-streaming completion call.
    async fn complete(&self, conversation: &IrConversation, params: &CompletionParams) -> Result<Completion, FmfError>;

    /// Perform a streaming completion call, invoking `on_token` for each
    /// incremental fragment. Only called when [`Self::supports_streaming`]
    /// returns `true`.
    async fn complete_streaming(
        &self,
        conversation: &IrConversation,
        params: &CompletionParams,
        on_token: TokenSink,
    ) -> Result<Completion, FmfError>;
}

/// Which inference mode a chain step requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMode {
    /// Prefer streaming, falling back to regular mode if unsupported or if
    /// the stream call fails.
    Auto,
    /// Always use a single non-streaming call.
    Regular,
    /// Always stream; an error if the provider does not support it.
    Stream,
}

impl Default for InferenceMode {
    fn default() -> Self {
        Self::Auto
    }
}

/// Parse a user-supplied mode string, accepting common synonyms.
pub fn normalize_mode(value: Option<&str>) -> Result<InferenceMode, FmfError> {
    let Some(value) = value else {
        return Ok(InferenceMode::default());
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" | "default" => Ok(InferenceMode::Auto),
        "regular" | "sync" | "standard" => Ok(InferenceMode::Regular),
        "stream" | "streaming" => Ok(InferenceMode::Stream),
        other => Err(FmfError::config(format!("unsupported inference mode: {other:?}"))),
    }
}

/// Per-call telemetry describing how a completion was produced.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InferenceTelemetry {
    /// Whether the call actually streamed.
    pub streaming: bool,
    /// The mode that was ultimately used.
    pub selected_mode: InferenceMode,
    /// Reason streaming was abandoned, if `auto` fell back.
    pub fallback_reason: Option<String>,
    /// Milliseconds to the first token (streaming) or to completion (regular).
    pub time_to_first_byte_ms: u64,
    /// Total call latency in milliseconds.
    pub latency_ms: u64,
    /// Number of streamed chunks received (`1` for non-streaming calls with output).
    pub chunk_count: u64,
    /// Completion tokens billed, if reported.
    pub tokens_out: Option<u64>,
    /// Total retry attempts across the call.
    pub retries: u64,
}

/// Invoke `provider` according to `mode`, retrying transient failures per
/// `retry_config` and recording the outcome in `metrics`. Mirrors the
/// mode-selection and graceful-fallback behavior of an `auto` inference
/// policy: `auto` prefers streaming and falls back to a regular call if
/// the provider doesn't support streaming or the stream call fails;
/// `stream` is rejected outright if the provider can't stream; `regular`
/// always performs a single non-streaming call.
pub async fn invoke_with_mode(
    provider: &dyn InferenceProvider,
    conversation: &IrConversation,
    params: &CompletionParams,
    mode: InferenceMode,
    retry_config: &RetryConfig,
    metrics: &Metrics,
) -> Result<(Completion, InferenceTelemetry), FmfError> {
    let supports_stream = provider.supports_streaming();

    let mut resolved_mode = mode;
    let mut fallback_reason = None;
    let mut use_stream = false;

    match mode {
        InferenceMode::Stream => {
            if !supports_stream {
                return Err(FmfError::provider(format!(
                    "streaming is not supported by provider {}",
                    provider.name()
                )));
            }
            use_stream = true;
        }
        InferenceMode::Auto => {
            if supports_stream {
                use_stream = true;
            } else {
                resolved_mode = InferenceMode::Regular;
                fallback_reason = Some("streaming_unsupported".to_string());
            }
        }
        InferenceMode::Regular => {
            resolved_mode = InferenceMode::Regular;
        }
    }

    let start = Instant::now();
    let chunk_count = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let first_token_at = Arc::new(std::sync::Mutex::new(None::<Instant>));

    let mut completion = None;
    let mut total_retries = 0u64;

    if use_stream {
        let chunk_count = Arc::clone(&chunk_count);
        let first_token_at = Arc::clone(&first_token_at);
        let sink: TokenSink = Arc::new(move |_token: &str| {
            chunk_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut guard = first_token_at.lock().expect("first-token mutex poisoned");
            if guard.is_none() {
                *guard = Some(Instant::now());
            }
        });

        let outcome = retry_async(retry_config, default_predicate, || {
            let sink = Arc::clone(&sink);
            async move { provider.complete_streaming(conversation, params, sink).await }
        })
        .await;

        match outcome {
            Ok(result) => {
                total_retries += result.metadata.total_attempts.saturating_sub(1);
                completion = Some(result.value);
            }
            Err(err) => {
                if mode == InferenceMode::Auto {
                    warn!(provider = provider.name(), error = %err, "streaming call failed, falling back to regular mode");
                    fallback_reason = Some(format!("stream_error:{}", err.kind));
                    resolved_mode = InferenceMode::Regular;
                    use_stream = false;
                } else {
                    return Err(FmfError::inference(format!("streaming request failed: {err}")).with_source(err));
                }
            }
        }
    }

    if completion.is_none() {
        let outcome = retry_async(retry_config, default_predicate, || async { provider.complete(conversation, params).await }).await?;
        total_retries += outcome.metadata.total_attempts.saturating_sub(1);
        completion = Some(outcome.value);
        use_stream = false;
    }

    let completion = completion.expect("completion is populated by one of the two branches above");
    let latency = start.elapsed();
    let first_token_at = *first_token_at.lock().expect("first-token mutex poisoned");
    let ttfb = if use_stream {
        first_token_at.map_or(latency, |t| t.duration_since(start))
    } else {
        latency
    };
    let observed_chunks = chunk_count.load(std::sync::atomic::Ordering::SeqCst);
    let chunk_count = if use_stream {
        observed_chunks
    } else {
        u64::from(!completion.text.is_empty())
    };

    metrics.record_provider_call(total_retries, use_stream, fallback_reason.is_some());
    if let (Some(p), Some(c)) = (completion.prompt_tokens, completion.completion_tokens) {
        metrics.record_tokens(p, c);
    }

    let telemetry = InferenceTelemetry {
        streaming: use_stream,
        selected_mode: resolved_mode,
        fallback_reason,
        time_to_first_byte_ms: u64::try_from(ttfb.as_millis()).unwrap_or(u64::MAX),
        latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        chunk_count,
        tokens_out: completion.completion_tokens,
        retries: total_retries,
    };

    Ok((completion, telemetry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmf_core::ir::IrConversation;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    struct FixedProvider {
        name: String,
        streaming: bool,
        stream_fails: bool,
        calls: AtomicU64,
    }

    #[async_trait]
    impl InferenceProvider for FixedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        async fn complete(&self, _conversation: &IrConversation, _params: &CompletionParams) -> Result<Completion, FmfError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Completion {
                text: "regular response".to_string(),
                model: Some("test-model".to_string()),
                stop_reason: Some("stop".to_string()),
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
            })
        }

        async fn complete_streaming(
            &self,
            _conversation: &IrConversation,
            _params: &CompletionParams,
            on_token: TokenSink,
        ) -> Result<Completion, FmfError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.stream_fails {
                return Err(FmfError::provider("stream exploded"));
            }
            on_token("stream");
            on_token(" response");
            Ok(Completion {
                text: "stream response".to_string(),
                model: Some("test-model".to_string()),
                stop_reason: Some("stop".to_string()),
                prompt_tokens: Some(10),
                completion_tokens: Some(5),
            })
        }
    }

    fn retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_elapsed: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn auto_mode_prefers_streaming_when_supported() {
        let provider = FixedProvider { name: "p".into(), streaming: true, stream_fails: false, calls: AtomicU64::new(0) };
        let metrics = Metrics::new();
        let (completion, telemetry) = invoke_with_mode(
            &provider,
            &IrConversation::new(),
            &CompletionParams::default(),
            InferenceMode::Auto,
            &retry_config(),
            &metrics,
        )
        .await
        .unwrap();
        assert!(telemetry.streaming);
        assert_eq!(completion.text, "stream response");
    }

    #[tokio::test]
    async fn auto_mode_falls_back_when_streaming_unsupported() {
        let provider = FixedProvider { name: "p".into(), streaming: false, stream_fails: false, calls: AtomicU64::new(0) };
        let metrics = Metrics::new();
        let (completion, telemetry) = invoke_with_mode(
            &provider,
            &IrConversation::new(),
            &CompletionParams::default(),
            InferenceMode::Auto,
            &retry_config(),
            &metrics,
        )
        .await
        .unwrap();
        assert!(!telemetry.streaming);
        assert_eq!(telemetry.fallback_reason.as_deref(), Some("streaming_unsupported"));
        assert_eq!(completion.text, "regular response");
    }

    #[tokio::test]
    async fn auto_mode_falls_back_when_stream_call_fails() {
        let provider = FixedProvider { name: "p".into(), streaming: true, stream_fails: true, calls: AtomicU64::new(0) };
        let metrics = Metrics::new();
        let (completion, telemetry) = invoke_with_mode(
            &provider,
            &IrConversation::new(),
            &CompletionParams::default(),
            InferenceMode::Auto,
            &retry_config(),
            &metrics,
        )
        .await
        .unwrap();
        assert!(!telemetry.streaming);
        assert!(telemetry.fallback_reason.as_deref().unwrap().starts_with("stream_error"));
        assert_eq!(completion.text, "regular response");
        assert_eq!(metrics.snapshot().streaming_fallback, 1);
    }

    #[tokio::test]
    async fn explicit_stream_mode_errors_when_unsupported() {
        let provider = FixedProvider { name: "p".into(), streaming: false, stream_fails: false, calls: AtomicU64::new(0) };
        let metrics = Metrics::new();
        let err = invoke_with_mode(
            &provider,
            &IrConversation::new(),
            &CompletionParams::default(),
            InferenceMode::Stream,
            &retry_config(),
            &metrics,
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, fmf_error::FmfErrorKind::Provider);
    }

    #[tokio::test]
    async fn regular_mode_never_streams() {
        let provider = FixedProvider { name: "p".into(), streaming: true, stream_fails: false, calls: AtomicU64::new(0) };
        let metrics = Metrics::new();
        let (completion, telemetry) = invoke_with_mode(
            &provider,
            &IrConversation::new(),
            &CompletionParams::default(),
            InferenceMode::Regular,
            &retry_config(),
            &metrics,
        )
        .await
        .unwrap();
        assert!(!telemetry.streaming);
        assert_eq!(completion.text, "regular response");
    }

    #[test]
    fn normalize_mode_accepts_synonyms() {
        assert_eq!(normalize_mode(Some("streaming")).unwrap(), InferenceMode::Stream);
        assert_eq!(normalize_mode(Some("sync")).unwrap(), InferenceMode::Regular);
        assert_eq!(normalize_mode(None).unwrap(), InferenceMode::Auto);
        assert!(normalize_mode(Some("bogus")).is_err());
    }
}
