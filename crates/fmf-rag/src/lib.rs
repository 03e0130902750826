// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sparse, embedding-free retrieval: a bag-of-words cosine-similarity
//! pipeline over text chunks and image blobs, used to assemble grounding
//! context for a chain step's prompt.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fmf_connect::{Connector, Selector};
use fmf_error::FmfError;
use fmf_split::{chunk_text, Splitter};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, Mutex};

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[a-z0-9]+").expect("valid token regex"));

/// A sparse word-frequency vector used for cosine similarity.
pub type TokenCounts = BTreeMap<String, u32>;

/// Lowercase and split `text` into alphanumeric tokens, returning a
/// frequency count suitable for cosine similarity.
#[must_use]
pub fn tokenize(text: &str) -> TokenCounts {
    let lower = text.to_lowercase();
    let mut counts = TokenCounts::new();
    for m in TOKEN_PATTERN.find_iter(&lower) {
        *counts.entry(m.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Cosine similarity between two sparse frequency vectors. `0.0` if
/// either is empty or the dot product is zero.
#[must_use]
pub fn cosine(a: &TokenCounts, b: &TokenCounts) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().filter_map(|(k, va)| b.get(k).map(|vb| f64::from(*va) * f64::from(*vb))).sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a = (a.values().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>()).sqrt();
    let norm_b = (b.values().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>()).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A retrievable text chunk and its precomputed token vector.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RagTextItem {
    /// Chunk id.
    pub id: String,
    /// Originating document URI.
    pub source_uri: String,
    /// Chunk text, inserted verbatim into the context block.
    pub content: String,
    /// Precomputed sparse token vector.
    #[serde(skip)]
    pub tokens: TokenCounts,
    /// Extra provenance (document metadata, `doc_id`, `source_uri`).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A retrievable image blob and its token vector derived from nearby text.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RagImageItem {
    /// Synthetic id, `"{doc_id}:{blob_id}"`.
    pub id: String,
    /// Originating document URI.
    pub source_uri: String,
    /// MIME type of the image.
    pub media_type: String,
    /// Raw image bytes, never serialized directly.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Precomputed sparse token vector (from nearby document text).
    #[serde(skip)]
    pub tokens: TokenCounts,
    /// Extra provenance (document metadata, `doc_id`, `blob_id`).
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The outcome of a single [`RagPipeline::retrieve`] call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RagResult {
    /// The query text that produced this result.
    pub query: String,
    /// Text hits, most similar first, with zero-similarity items dropped.
    pub texts: Vec<RagTextItem>,
    /// Image hits, most similar first, with zero-similarity items dropped.
    pub images: Vec<RagImageItem>,
}

/// An in-memory retrieval index built once per run and queried per row.
pub struct RagPipeline {
    /// The pipeline's configured name.
    pub name: String,
    text_items: Vec<RagTextItem>,
    image_items: Vec<RagImageItem>,
    history: Mutex<Vec<RagResultRecord>>,
}

#[derive(Debug, Clone, serde::Serialize)]
struct RagResultRecord {
    query: String,
    text_ids: Vec<String>,
    image_ids: Vec<String>,
}

impl RagPipeline {
    /// Construct a pipeline from already-indexed items (used by tests and
    /// by [`build_rag_pipeline`]).
    #[must_use]
    pub fn new(name: impl Into<String>, text_items: Vec<RagTextItem>, image_items: Vec<RagImageItem>) -> Self {
        Self {
            name: name.into(),
            text_items,
            image_items,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Retrieve the top `top_k_text` text chunks and `top_k_images` images
    /// most similar to `query`, dropping any with zero similarity.
    pub fn retrieve(&self, query: &str, top_k_text: usize, top_k_images: usize) -> RagResult {
        let q_tokens = tokenize(query);

        let texts = Self::top_k(&self.text_items, &q_tokens, top_k_text, |item| &item.tokens);
        let images = Self::top_k(&self.image_items, &q_tokens, top_k_images, |item| &item.tokens);

        let record = RagResultRecord {
            query: query.to_string(),
            text_ids: texts.iter().map(|t| t.id.clone()).collect(),
            image_ids: images.iter().map(|i| i.id.clone()).collect(),
        };
        self.history.lock().expect("rag history mutex poisoned").push(record);

        RagResult { query: query.to_string(), texts, images }
    }

    fn top_k<'a, T: Clone>(
        items: &'a [T],
        query: &TokenCounts,
        k: usize,
        tokens_of: impl Fn(&'a T) -> &'a TokenCounts,
    ) -> Vec<T> {
        if k == 0 {
            return Vec::new();
        }
        let mut scored: Vec<(f64, &T)> = items.iter().map(|item| (cosine(query, tokens_of(item)), item)).collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored
            .into_iter()
            .filter(|(score, _)| *score > 0.0)
            .take(k)
            .map(|(_, item)| item.clone())
            .collect()
    }

    /// Render retrieved text items as a numbered context block, one entry
    /// per line pair: `"[n] content"` followed by `"    source: uri"`.
    #[must_use]
    pub fn format_text_block(items: &[RagTextItem]) -> String {
        let mut lines = Vec::with_capacity(items.len() * 2);
        for (idx, item) in items.iter().enumerate() {
            lines.push(format!("[{}] {}", idx + 1, item.content));
            let src = item
                .metadata
                .get("source_uri")
                .and_then(|v| v.as_str())
                .unwrap_or(&item.source_uri);
            lines.push(format!("    source: {src}"));
        }
        lines.join("\n")
    }

    /// Render retrieved images as `data:` URLs for multimodal payloads.
    #[must_use]
    pub fn image_data_urls(items: &[RagImageItem]) -> Vec<String> {
        use base64::Engine;
        items
            .iter()
            .map(|item| {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&item.data);
                format!("data:{};base64,{}", item.media_type, encoded)
            })
            .collect()
    }

    /// Serializable snapshot of every retrieval made against this pipeline
    /// so far, in call order. Written to `rag/<pipeline>.jsonl` at run end.
    #[must_use]
    pub fn history(&self) -> Vec<serde_json::Value> {
        self.history
            .lock()
            .expect("rag history mutex poisoned")
            .iter()
            .map(|record| serde_json::to_value(record).expect("RagResultRecord always serializes"))
            .collect()
    }

    /// Number of indexed text items.
    #[must_use]
    pub fn text_len(&self) -> usize {
        self.text_items.len()
    }

    /// Number of indexed image items.
    #[must_use]
    pub fn image_len(&self) -> usize {
        self.image_items.len()
    }
}

/// Which modalities a pipeline indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    /// Index chunked document text only.
    Text,
    /// Index image blobs only.
    Image,
    /// Index both text chunks and image blobs.
    Both,
}

impl Modality {
    fn includes_text(self) -> bool {
        matches!(self, Self::Text | Self::Both)
    }

    fn includes_images(self) -> bool {
        matches!(self, Self::Image | Self::Both)
    }
}

/// Configuration for indexing a single pipeline's connector contents.
#[derive(Debug, Clone)]
pub struct RagPipelineConfig {
    /// The pipeline's name, used to look it up from chain config.
    pub name: String,
    /// Which modalities to index.
    pub modalities: Modality,
    /// Cap on the number of text chunks indexed, if any.
    pub max_text_items: Option<usize>,
    /// Cap on the number of image blobs indexed, if any.
    pub max_image_items: Option<usize>,
    /// Include/exclude selector scoping the connector listing.
    pub select: Selector,
    /// Maximum tokens per chunk, passed to the chunker.
    pub chunk_max_tokens: usize,
    /// Token overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Which sentence/paragraph splitter to use.
    pub splitter: Splitter,
}

/// Build and index a single retrieval pipeline by listing and loading
/// every resource `connector` exposes under `config.select`.
pub async fn build_rag_pipeline(config: &RagPipelineConfig, connector: Arc<dyn Connector>) -> Result<RagPipeline, FmfError> {
    let refs = connector.list(&config.select).await?;

    let mut text_items = Vec::new();
    let mut image_items = Vec::new();

    for resource in refs {
        let data = connector.open(&resource).await?;
        let filename = resource.name.clone();
        let doc = fmf_loader::load_document_from_bytes(&resource.uri, &filename, &data)?;

        if config.modalities.includes_text() {
            if let Some(text) = &doc.text {
                let chunks = chunk_text(&doc.id, text, config.chunk_max_tokens, config.chunk_overlap, config.splitter);
                for chunk in chunks {
                    if config.max_text_items.is_some_and(|max| text_items.len() >= max) {
                        break;
                    }
                    let tokens = tokenize(&chunk.text);
                    let mut metadata = doc.metadata.clone();
                    metadata.insert("doc_id".to_string(), serde_json::json!(doc.id));
                    metadata.insert("source_uri".to_string(), serde_json::json!(doc.source_uri));
                    text_items.push(RagTextItem {
                        id: chunk.id,
                        source_uri: doc.source_uri.clone(),
                        content: chunk.text,
                        tokens,
                        metadata,
                    });
                }
            }
        }

        if config.modalities.includes_images() && !doc.blobs.is_empty() {
            for blob in &doc.blobs {
                if config.max_image_items.is_some_and(|max| image_items.len() >= max) {
                    break;
                }
                let text_repr = doc.text.clone().unwrap_or_else(|| filename.clone());
                let tokens = tokenize(&text_repr);
                let mut metadata = doc.metadata.clone();
                metadata.insert("doc_id".to_string(), serde_json::json!(doc.id));
                metadata.insert("blob_id".to_string(), serde_json::json!(blob.id));
                image_items.push(RagImageItem {
                    id: format!("{}:{}", doc.id, blob.id),
                    source_uri: doc.source_uri.clone(),
                    media_type: blob.media_type.clone(),
                    data: blob.data.clone(),
                    tokens,
                    metadata,
                });
            }
        }
    }

    Ok(RagPipeline::new(config.name.clone(), text_items, image_items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_and_splits_on_non_alphanumeric() {
        let tokens = tokenize("Hello, World! 123");
        assert_eq!(tokens.get("hello"), Some(&1));
        assert_eq!(tokens.get("world"), Some(&1));
        assert_eq!(tokens.get("123"), Some(&1));
    }

    #[test]
    fn cosine_is_zero_for_disjoint_vectors() {
        let a = tokenize("apples and oranges");
        let b = tokenize("xyz qrs tuv");
        assert_eq!(cosine(&a, &b), 0.0);
    }

    #[test]
    fn cosine_is_one_for_identical_vectors() {
        let a = tokenize("the quick brown fox");
        let b = tokenize("the quick brown fox");
        assert!((cosine(&a, &b) - 1.0).abs() < 1e-9);
    }

    fn item(id: &str, content: &str) -> RagTextItem {
        RagTextItem {
            id: id.to_string(),
            source_uri: format!("file:///{id}"),
            content: content.to_string(),
            tokens: tokenize(content),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn retrieve_ranks_by_similarity_and_drops_zero_scores() {
        let pipeline = RagPipeline::new(
            "docs",
            vec![
                item("a", "rust programming language memory safety"),
                item("b", "python scripting language dynamic typing"),
                item("c", "completely unrelated topic about gardening"),
            ],
            vec![],
        );
        let result = pipeline.retrieve("rust memory safety language", 2, 0);
        assert_eq!(result.texts.len(), 2);
        assert_eq!(result.texts[0].id, "a");
    }

    #[test]
    fn retrieve_with_zero_top_k_returns_empty() {
        let pipeline = RagPipeline::new("docs", vec![item("a", "some content")], vec![]);
        let result = pipeline.retrieve("some content", 0, 0);
        assert!(result.texts.is_empty());
    }

    #[test]
    fn format_text_block_numbers_entries_and_shows_source() {
        let items = vec![item("a", "first chunk"), item("b", "second chunk")];
        let block = RagPipeline::format_text_block(&items);
        assert!(block.contains("[1] first chunk"));
        assert!(block.contains("source: file:///a"));
        assert!(block.contains("[2] second chunk"));
    }

    #[test]
    fn history_records_every_retrieval_in_call_order() {
        let pipeline = RagPipeline::new("docs", vec![item("a", "rust memory safety")], vec![]);
        pipeline.retrieve("rust", 1, 0);
        pipeline.retrieve("memory", 1, 0);
        let history = pipeline.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["query"], serde_json::json!("rust"));
        assert_eq!(history[1]["query"], serde_json::json!("memory"));
    }

    #[test]
    fn image_data_urls_encode_base64() {
        let images = vec![RagImageItem {
            id: "doc:blob".to_string(),
            source_uri: "file:///a.png".to_string(),
            media_type: "image/png".to_string(),
            data: vec![1, 2, 3],
            tokens: TokenCounts::new(),
            metadata: BTreeMap::new(),
        }];
        let urls = RagPipeline::image_data_urls(&images);
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("data:image/png;base64,"));
    }
}
