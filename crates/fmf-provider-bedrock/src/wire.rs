// SPDX-License-Identifier: MIT OR Apache-2.0
//! Anthropic Messages API wire types (as fronted by AWS Bedrock's
//! `InvokeModel`) and IR lowering.

use fmf_core::ir::{IrContentBlock, IrConversation, IrRole};
use serde::{Deserialize, Serialize};

/// A single content block inside an Anthropic Messages user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WirePart {
    /// A plain text part.
    Text {
        /// The text.
        text: String,
    },
    /// An inline base64-encoded image part.
    Image {
        /// The image source.
        source: WireImageSource,
    },
}

/// The `source` object inside a [`WirePart::Image`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireImageSource {
    /// Always `"base64"` for this adapter.
    #[serde(rename = "type")]
    pub source_type: String,
    /// MIME type of the image.
    pub media_type: String,
    /// Base64-encoded image bytes.
    pub data: String,
}

/// A single message in the Anthropic Messages format (system prompt is
/// carried separately on the request, not as a message).
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    /// `"user"` or `"assistant"`.
    pub role: String,
    /// Ordered content parts.
    pub content: Vec<WirePart>,
}

fn lower_blocks(blocks: &[IrContentBlock]) -> Vec<WirePart> {
    blocks
        .iter()
        .filter_map(|block| match block {
            IrContentBlock::Text { text } => Some(WirePart::Text { text: text.clone() }),
            IrContentBlock::Image { media_type, data } => Some(WirePart::Image {
                source: WireImageSource { source_type: "base64".to_string(), media_type: media_type.clone(), data: data.clone() },
            }),
            _ => None,
        })
        .collect()
}

/// Lower a provider-neutral conversation into an Anthropic Messages
/// request body: system messages are concatenated into a single `system`
/// field, and every non-system message becomes a `user`/`assistant` turn
/// with text/image content parts.
#[must_use]
pub fn lower_conversation(conversation: &IrConversation) -> (Option<String>, Vec<WireMessage>) {
    let system_text = conversation
        .messages
        .iter()
        .filter(|m| m.role == IrRole::System)
        .map(fmf_core::ir::IrMessage::text_content)
        .collect::<Vec<_>>();
    let system = if system_text.is_empty() { None } else { Some(system_text.join("\n\n")) };

    let messages = conversation
        .messages
        .iter()
        .filter(|m| m.role != IrRole::System)
        .map(|m| WireMessage {
            role: match m.role {
                IrRole::Assistant => "assistant".to_string(),
                _ => "user".to_string(),
            },
            content: lower_blocks(&m.content),
        })
        .collect();

    (system, messages)
}

/// An `InvokeModel` request body (`anthropic_version` + Messages API shape).
#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    /// Fixed Anthropic Bedrock schema version.
    pub anthropic_version: String,
    /// Conversation turns.
    pub messages: Vec<WireMessage>,
    /// Concatenated system prompt, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// A non-streaming `InvokeModel` response body.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponse {
    /// Response content blocks; concatenated text blocks form the completion.
    #[serde(default)]
    pub content: Vec<WireResponseBlock>,
    /// Why generation stopped.
    #[serde(default)]
    pub stop_reason: Option<String>,
    /// Token usage.
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

/// A single content block in a [`WireResponse`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResponseBlock {
    /// A text block.
    Text {
        /// The text.
        text: String,
    },
    /// Any other block type this adapter doesn't project further.
    #[serde(other)]
    Other,
}

/// Token usage reported by Bedrock's Anthropic Messages API.
#[derive(Debug, Clone, Deserialize)]
pub struct WireUsage {
    /// Input (prompt) tokens billed.
    pub input_tokens: u64,
    /// Output (completion) tokens billed.
    pub output_tokens: u64,
}

/// A single `invoke-model-with-response-stream` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireStreamEvent {
    /// A content-block delta event.
    ContentBlockDelta {
        /// The incremental delta.
        delta: WireStreamDelta,
    },
    /// The terminal message-delta event, carrying stop reason and usage.
    MessageDelta {
        /// Delta fields (stop reason).
        delta: WireMessageDeltaFields,
        /// Usage accumulated so far.
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    /// Any other event type this adapter ignores.
    #[serde(other)]
    Other,
}

/// The `delta` payload inside a [`WireStreamEvent::ContentBlockDelta`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireStreamDelta {
    /// An incremental text fragment.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// Any other delta type this adapter ignores.
    #[serde(other)]
    Other,
}

/// Fields inside a [`WireStreamEvent::MessageDelta`].
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessageDeltaFields {
    /// Why generation stopped.
    #[serde(default)]
    pub stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmf_core::ir::IrMessage;

    #[test]
    fn lower_conversation_separates_system_from_turns() {
        let conv = IrConversation::new()
            .push(IrMessage::text(IrRole::System, "be concise"))
            .push(IrMessage::text(IrRole::User, "hello"));
        let (system, messages) = lower_conversation(&conv);
        assert_eq!(system.as_deref(), Some("be concise"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn lower_conversation_maps_image_blocks() {
        let conv = IrConversation::new().push(IrMessage::new(
            IrRole::User,
            vec![IrContentBlock::Image { media_type: "image/png".to_string(), data: "AAAA".to_string() }],
        ));
        let (_, messages) = lower_conversation(&conv);
        match &messages[0].content[0] {
            WirePart::Image { source } => assert_eq!(source.media_type, "image/png"),
            WirePart::Text { .. } => panic!("expected image part"),
        }
    }
}
