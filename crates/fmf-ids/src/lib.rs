// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content-addressed identifiers for documents, chunks, and blobs.
//!
//! Identifiers are derived from a digest of normalized content plus a
//! namespace string that disambiguates the entity kind. The same input
//! always yields the same id, which lets the rest of the pipeline treat
//! ids as stable cache keys across runs.

use blake2::Blake2bVar;
use blake2::digest::{Update, VariableOutput};
use std::env;
use unicode_normalization::UnicodeNormalization;

/// Hash algorithm used to derive content-addressed ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgo {
    /// BLAKE2b truncated to 128 bits. Default.
    Blake2b,
    /// xxHash64, for environments that prefer a non-cryptographic hash.
    Xxh64,
}

impl HashAlgo {
    /// Read the configured algorithm from `FMF_HASH_ALGO`, defaulting to
    /// [`HashAlgo::Blake2b`] when unset or unrecognized.
    #[must_use]
    pub fn from_env() -> Self {
        match env::var("FMF_HASH_ALGO") {
            Ok(v) if v.eq_ignore_ascii_case("xxh64") => Self::Xxh64,
            _ => Self::Blake2b,
        }
    }
}

/// Normalize text before hashing: strip a leading BOM, canonicalize line
/// endings to `\n`, and apply Unicode NFC normalization.
///
/// This guarantees that two documents which differ only in encoding
/// artifacts (a stray BOM, CRLF vs LF) produce the same id.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let stripped = text.strip_prefix('\u{feff}').unwrap_or(text);
    let unified = stripped.replace("\r\n", "\n").replace('\r', "\n");
    unified.nfc().collect()
}

/// Hash `data` under `namespace` with `algo`, returning a lowercase hex digest.
///
/// The namespace is mixed into the digest (not merely prepended to the
/// output) so that two different entity kinds hashing the same bytes
/// never collide.
#[must_use]
pub fn hash_bytes(data: &[u8], namespace: &str, algo: HashAlgo) -> String {
    match algo {
        HashAlgo::Blake2b => {
            let mut hasher = Blake2bVar::new(16).expect("16 is a valid blake2b output size");
            hasher.update(namespace.as_bytes());
            hasher.update(b"\0");
            hasher.update(data);
            let mut out = [0u8; 16];
            hasher.finalize_variable(&mut out).expect("fixed-size output buffer");
            hex::encode(out)
        }
        HashAlgo::Xxh64 => {
            let mut buf = Vec::with_capacity(namespace.len() + 1 + data.len());
            buf.extend_from_slice(namespace.as_bytes());
            buf.push(0);
            buf.extend_from_slice(data);
            let digest = xxhash_rust::xxh64::xxh64(&buf, 0);
            hex::encode(digest.to_be_bytes())
        }
    }
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let bytes = bytes.as_ref();
        let mut out = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            write!(out, "{b:02x}").expect("writing to a String never fails");
        }
        out
    }
}

/// Derive a document id from its content plus its source URI and
/// optional provenance fields. The id is content-addressed: two
/// documents with the same bytes hash to the same id regardless of
/// URI, and two documents at the same URI with different content
/// never collide.
#[must_use]
pub fn document_id(
    source_uri: &str,
    payload: &[u8],
    modified_at: Option<&str>,
    mime: Option<&str>,
    len: Option<usize>,
) -> String {
    let algo = HashAlgo::from_env();
    let mut namespace = source_uri.to_string();
    if let Some(m) = modified_at {
        namespace.push('|');
        namespace.push_str(m);
    }
    if let Some(mime) = mime {
        namespace.push_str("|mime=");
        namespace.push_str(mime);
    }
    if let Some(len) = len {
        namespace.push_str("|len=");
        namespace.push_str(&len.to_string());
    }
    let digest = hash_bytes(payload, &namespace, algo);
    format!("doc_{digest}")
}

/// Derive a chunk id from its parent document id, position, and payload.
#[must_use]
pub fn chunk_id(document_id: &str, index: usize, payload: &str) -> String {
    let algo = HashAlgo::from_env();
    let namespace = format!("{document_id}|{index}|len={}", payload.len());
    let digest = hash_bytes(payload.as_bytes(), &namespace, algo);
    format!("{document_id}_ch_{}", &digest[..12.min(digest.len())])
}

/// Derive a blob id (e.g. an embedded image) from its parent document id,
/// media type, and payload.
#[must_use]
pub fn blob_id(document_id: &str, media_type: &str, payload: &[u8]) -> String {
    let algo = HashAlgo::from_env();
    let namespace = format!("{document_id}|{media_type}|len={}", payload.len());
    let digest = hash_bytes(payload, &namespace, algo);
    format!("blob_{}", &digest[..12.min(digest.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_bom_and_crlf() {
        let input = "\u{feff}line one\r\nline two\rline three";
        assert_eq!(normalize_text(input), "line one\nline two\nline three");
    }

    #[test]
    fn normalize_is_idempotent() {
        let input = "caf\u{65}\u{301}"; // combining accent, NFD form
        let once = normalize_text(input);
        let twice = normalize_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn document_id_is_deterministic() {
        let a = document_id("file:///a.txt", b"hello", Some("2024-01-01T00:00:00Z"), None, Some(10));
        let b = document_id("file:///a.txt", b"hello", Some("2024-01-01T00:00:00Z"), None, Some(10));
        assert_eq!(a, b);
        assert!(a.starts_with("doc_"));
    }

    #[test]
    fn document_id_changes_with_provenance() {
        let a = document_id("file:///a.txt", b"hello", Some("2024-01-01T00:00:00Z"), None, Some(10));
        let b = document_id("file:///a.txt", b"hello", Some("2024-06-01T00:00:00Z"), None, Some(10));
        assert_ne!(a, b);
    }

    #[test]
    fn document_id_changes_with_content_at_same_uri() {
        let a = document_id("file:///a.txt", b"hello", None, None, None);
        let b = document_id("file:///a.txt", b"goodbye", None, None, None);
        assert_ne!(a, b);
    }

    #[test]
    fn chunk_id_namespaced_by_parent_and_index() {
        let doc = "doc_abc";
        let c0 = chunk_id(doc, 0, "hello");
        let c1 = chunk_id(doc, 1, "hello");
        assert_ne!(c0, c1);
        assert!(c0.starts_with("doc_abc_ch_"));
    }

    #[test]
    fn blob_id_differs_by_media_type() {
        let doc = "doc_abc";
        let png = blob_id(doc, "image/png", b"data");
        let jpg = blob_id(doc, "image/jpeg", b"data");
        assert_ne!(png, jpg);
    }

    #[test]
    fn xxh64_selected_via_env_produces_shorter_digest() {
        // Exercise both code paths directly rather than depend on process
        // environment, which is process-global and shared across tests.
        let blake = hash_bytes(b"payload", "ns", HashAlgo::Blake2b);
        let xxh = hash_bytes(b"payload", "ns", HashAlgo::Xxh64);
        assert_eq!(blake.len(), 32);
        assert_eq!(xxh.len(), 16);
        assert_ne!(blake, xxh);
    }
}
