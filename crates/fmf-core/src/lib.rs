// SPDX-License-Identifier: MIT OR Apache-2.0
//! Core domain types shared across the framework's crates: connector
//! resource handles, documents, chunks, table rows, image groups, and the
//! provider-neutral message IR.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ir;

pub use ir::{IrContentBlock, IrConversation, IrMessage, IrRole, IrToolDefinition, IrUsage};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A handle to a single resource as listed by a connector, before it has
/// been opened or read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceRef {
    /// Connector-relative identifier (e.g. a relative path or object key).
    pub id: String,
    /// Fully-qualified source URI (e.g. `file:///...`, `s3://bucket/key`).
    pub uri: String,
    /// Display name, typically the final path segment.
    pub name: String,
}

/// Provenance metadata about a resource, fetched lazily (connectors may
/// need a network round trip to produce it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceInfo {
    /// Fully-qualified source URI.
    pub source_uri: String,
    /// Last-modified timestamp, if the backing store reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    /// Opaque version/etag token, if the backing store reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Size in bytes, if known without reading the full content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Connector-specific extra fields (e.g. storage class, encryption state).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A binary payload embedded in or alongside a document, such as an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Blob {
    /// Content-addressed blob id.
    pub id: String,
    /// MIME type (e.g. `"image/png"`).
    pub media_type: String,
    /// Raw bytes. Never serialized to JSON artefacts directly; callers
    /// base64-encode on demand via [`data_url`].
    #[serde(skip)]
    pub data: Vec<u8>,
}

/// A loaded and normalized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Document {
    /// Content-addressed document id.
    pub id: String,
    /// Fully-qualified source URI.
    pub source_uri: String,
    /// Extracted plain text, if the loader produced any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Detected or declared MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    /// Free-form metadata captured during loading (filename, row counts, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Embedded binary blobs (e.g. images extracted from a slide deck).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(skip)]
    pub blobs: Vec<Blob>,
}

/// Provenance describing how a [`Chunk`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChunkProvenance {
    /// 0-based position among the chunks derived from the same document.
    pub index: usize,
    /// Splitting strategy used (`"by_sentence"` or `"by_paragraph"`).
    pub splitter: &'static str,
    /// Length of the chunk text in characters.
    pub length_chars: usize,
}

/// A bounded slice of a document's text, ready for inclusion in a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Chunk {
    /// Content-addressed chunk id.
    pub id: String,
    /// Id of the document this chunk was derived from.
    pub doc_id: String,
    /// Source URI of the parent document, carried for convenience.
    pub source_uri: String,
    /// The chunk's text.
    pub text: String,
    /// How this chunk was produced.
    pub provenance: ChunkProvenance,
}

/// A single row extracted from a tabular input (CSV, spreadsheet, Parquet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TableRow {
    /// Content-addressed row id.
    pub id: String,
    /// Id of the document this row's table was loaded from. `None` for
    /// rows synthesized inline (`dataframe_rows`), which have no backing
    /// document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    /// Source URI of the table this row came from.
    pub source_uri: String,
    /// 0-based row position within the table.
    pub index: usize,
    /// Column values, keyed by (de-duplicated) header name.
    pub values: BTreeMap<String, serde_json::Value>,
    /// Derived free-text representation of the row, if `text_column` was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A group of images (and optional caption text) processed together as a
/// single multimodal unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageGroup {
    /// Content-addressed group id.
    pub id: String,
    /// Source URIs contributing to this group.
    pub source_uris: Vec<String>,
    /// Member blobs (typically images).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(skip)]
    pub blobs: Vec<Blob>,
}

/// Render a blob as a `data:` URL suitable for multimodal provider payloads.
#[must_use]
pub fn data_url(blob: &Blob) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&blob.data);
    format!("data:{};base64,{}", blob.media_type, encoded)
}
