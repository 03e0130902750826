// SPDX-License-Identifier: MIT OR Apache-2.0
//! Azure/OpenAI Chat Completions wire types and IR lowering.

use fmf_core::ir::{IrContentBlock, IrConversation, IrRole};
use serde::{Deserialize, Serialize};

/// A single message in the Chat Completions wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message role (`system`, `user`, `assistant`, or `tool`).
    pub role: String,
    /// Either plain text or an array of typed content parts.
    pub content: WireContent,
}

/// A message's content: either a plain string or a list of typed parts,
/// matching the Chat Completions multimodal content shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    /// Plain text content.
    Text(String),
    /// Multimodal content parts (text and/or image URLs).
    Parts(Vec<WireContentPart>),
}

/// A single content part inside multimodal [`WireContent::Parts`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentPart {
    /// A plain text part.
    Text {
        /// The text.
        text: String,
    },
    /// An image referenced by URL (including `data:` URLs).
    ImageUrl {
        /// The image URL wrapper.
        image_url: WireImageUrl,
    },
}

/// The nested `image_url` object inside a [`WireContentPart::ImageUrl`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImageUrl {
    /// The image URL, often a `data:` URL for inline images.
    pub url: String,
}

fn role_str(role: IrRole) -> &'static str {
    match role {
        IrRole::System => "system",
        IrRole::User => "user",
        IrRole::Assistant => "assistant",
        IrRole::Tool => "tool",
    }
}

/// Lower a provider-neutral conversation into Chat Completions messages.
///
/// Messages that are plain text lower to a string `content`; messages with
/// any non-text block lower to a content-parts array. Tool-use/tool-result
/// blocks are not part of this adapter's supported surface and are skipped.
#[must_use]
pub fn lower_conversation(conversation: &IrConversation) -> Vec<WireMessage> {
    conversation
        .messages
        .iter()
        .map(|msg| {
            if msg.is_text_only() {
                WireMessage {
                    role: role_str(msg.role).to_string(),
                    content: WireContent::Text(msg.text_content()),
                }
            } else {
                let parts = msg
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        IrContentBlock::Text { text } => Some(WireContentPart::Text { text: text.clone() }),
                        IrContentBlock::Image { media_type, data } => Some(WireContentPart::ImageUrl {
                            image_url: WireImageUrl { url: format!("data:{media_type};base64,{data}") },
                        }),
                        _ => None,
                    })
                    .collect();
                WireMessage { role: role_str(msg.role).to_string(), content: WireContent::Parts(parts) }
            }
        })
        .collect()
}

/// A Chat Completions request body.
#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    /// Conversation messages.
    pub messages: Vec<WireMessage>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Whether to stream the response via SSE.
    pub stream: bool,
}

/// A non-streaming Chat Completions response body.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponse {
    /// Model that produced the completion.
    #[serde(default)]
    pub model: Option<String>,
    /// Completion choices; only the first is used.
    pub choices: Vec<WireChoice>,
    /// Token usage, if reported.
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

/// A single choice in a [`WireResponse`].
#[derive(Debug, Clone, Deserialize)]
pub struct WireChoice {
    /// The assistant's message.
    pub message: WireResponseMessage,
    /// Why generation stopped.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The assistant message inside a [`WireChoice`].
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponseMessage {
    /// The generated text, if any.
    #[serde(default)]
    pub content: Option<String>,
}

/// Token usage reported by the API.
#[derive(Debug, Clone, Deserialize)]
pub struct WireUsage {
    /// Prompt tokens billed.
    pub prompt_tokens: u64,
    /// Completion tokens billed.
    pub completion_tokens: u64,
}

/// A single streaming chunk (`chat.completion.chunk` SSE event).
#[derive(Debug, Clone, Deserialize)]
pub struct WireChunk {
    /// Model that produced the chunk.
    #[serde(default)]
    pub model: Option<String>,
    /// Streaming choices, typically one element.
    #[serde(default)]
    pub choices: Vec<WireChunkChoice>,
    /// Token usage, only present on the final chunk when requested.
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

/// A single choice inside a [`WireChunk`].
#[derive(Debug, Clone, Deserialize)]
pub struct WireChunkChoice {
    /// The incremental delta.
    #[serde(default)]
    pub delta: WireChunkDelta,
    /// Finish reason, present only on the final chunk for this choice.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The delta payload inside a [`WireChunkChoice`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireChunkDelta {
    /// Incremental text content.
    #[serde(default)]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmf_core::ir::IrMessage;

    #[test]
    fn lowers_text_only_message_to_plain_string() {
        let conv = IrConversation::new().push(IrMessage::text(IrRole::User, "hello"));
        let wire = lower_conversation(&conv);
        assert_eq!(wire.len(), 1);
        match &wire[0].content {
            WireContent::Text(t) => assert_eq!(t, "hello"),
            WireContent::Parts(_) => panic!("expected text content"),
        }
    }

    #[test]
    fn lowers_multimodal_message_to_content_parts() {
        let conv = IrConversation::new().push(IrMessage::new(
            IrRole::User,
            vec![
                IrContentBlock::Text { text: "describe this".to_string() },
                IrContentBlock::Image { media_type: "image/png".to_string(), data: "AAAA".to_string() },
            ],
        ));
        let wire = lower_conversation(&conv);
        match &wire[0].content {
            WireContent::Parts(parts) => assert_eq!(parts.len(), 2),
            WireContent::Text(_) => panic!("expected content parts"),
        }
    }
}
