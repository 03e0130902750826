// SPDX-License-Identifier: MIT OR Apache-2.0
//! Document loading: turn raw bytes from a connector into a normalized
//! [`Document`], dispatching on file extension.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fmf_core::{Blob, Document};
use fmf_error::FmfError;
use fmf_ids::{blob_id, document_id, normalize_text};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid tag regex"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("valid whitespace regex"));

fn extension(filename: &str) -> String {
    filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase()
}

fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext {
        "txt" => Some("text/plain"),
        "md" => Some("text/markdown"),
        "html" | "htm" => Some("text/html"),
        "csv" => Some("text/csv"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Strip HTML tags and collapse runs of whitespace into single spaces,
/// leaving newlines (paragraph breaks) intact for the chunker.
#[must_use]
pub fn strip_html(html: &str) -> String {
    let without_tags = TAG.replace_all(html, " ");
    let collapsed = WHITESPACE_RUN.replace_all(&without_tags, " ");
    collapsed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Load and normalize a document from raw bytes, dispatching by the file
/// extension implied by `filename`.
pub fn load_document_from_bytes(source_uri: &str, filename: &str, data: &[u8]) -> Result<Document, FmfError> {
    let ext = extension(filename);
    let mime = mime_for_extension(&ext).map(str::to_string);

    let mut metadata = BTreeMap::new();
    metadata.insert("filename".to_string(), serde_json::json!(filename));

    if matches!(ext.as_str(), "png" | "jpg" | "jpeg" | "gif" | "webp") {
        let doc_id = document_id(source_uri, data, None, mime.as_deref(), Some(data.len()));
        let media_type = mime.clone().unwrap_or_else(|| "application/octet-stream".to_string());
        let blob = Blob {
            id: blob_id(&doc_id, &media_type, data),
            media_type,
            data: data.to_vec(),
        };
        return Ok(Document {
            id: doc_id,
            source_uri: source_uri.to_string(),
            text: None,
            mime,
            metadata,
            blobs: vec![blob],
        });
    }

    let raw = std::str::from_utf8(data)
        .map_err(|e| FmfError::processing(format!("document is not valid UTF-8: {e}")))?;
    let normalized = normalize_text(raw);
    let text = if ext == "html" || ext == "htm" {
        strip_html(&normalized)
    } else {
        normalized
    };

    let doc_id = document_id(source_uri, text.as_bytes(), None, mime.as_deref(), Some(text.len()));
    Ok(Document {
        id: doc_id,
        source_uri: source_uri.to_string(),
        text: Some(text),
        mime,
        metadata,
        blobs: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_plain_text() {
        let doc = load_document_from_bytes("file:///a.txt", "a.txt", b"hello world").unwrap();
        assert_eq!(doc.text.as_deref(), Some("hello world"));
        assert_eq!(doc.mime.as_deref(), Some("text/plain"));
        assert!(doc.blobs.is_empty());
    }

    #[test]
    fn strips_html_tags_and_collapses_whitespace() {
        let html = "<html><body><h1>Title</h1>\n\n<p>Hello   world.</p></body></html>";
        let doc = load_document_from_bytes("file:///a.html", "a.html", html.as_bytes()).unwrap();
        let text = doc.text.unwrap();
        assert!(!text.contains('<'));
        assert!(text.contains("Title"));
        assert!(text.contains("Hello world."));
    }

    #[test]
    fn loads_image_as_blob_without_text() {
        let doc = load_document_from_bytes("file:///a.png", "a.png", &[0x89, 0x50, 0x4e, 0x47]).unwrap();
        assert!(doc.text.is_none());
        assert_eq!(doc.blobs.len(), 1);
        assert_eq!(doc.blobs[0].media_type, "image/png");
    }

    #[test]
    fn invalid_utf8_is_processing_error() {
        let err = load_document_from_bytes("file:///a.txt", "a.txt", &[0xff, 0xfe, 0xfd]).unwrap_err();
        assert_eq!(err.kind, fmf_error::FmfErrorKind::Processing);
    }

    #[test]
    fn document_id_is_deterministic_for_identical_bytes() {
        let a = load_document_from_bytes("file:///a.txt", "a.txt", b"same content").unwrap();
        let b = load_document_from_bytes("file:///a.txt", "a.txt", b"same content").unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn document_id_differs_for_different_content_at_same_uri() {
        let a = load_document_from_bytes("file:///a.txt", "a.txt", b"version one").unwrap();
        let b = load_document_from_bytes("file:///a.txt", "a.txt", b"version two!").unwrap();
        assert_ne!(a.id, b.id);
    }
}
