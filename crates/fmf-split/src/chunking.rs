// SPDX-License-Identifier: MIT OR Apache-2.0
//! Greedy token-bounded text chunking with word-level overlap.

use fmf_core::{Chunk, ChunkProvenance};
use fmf_ids::chunk_id;
use regex::Regex;
use std::sync::LazyLock;

static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+").expect("valid sentence regex"));
static PARAGRAPH_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\n+").expect("valid paragraph regex"));
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid word regex"));
static NON_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+").expect("valid non-space regex"));

/// Splitting strategy for breaking a document into chunkable units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Splitter {
    /// Split on sentence boundaries (`. ! ?` followed by whitespace).
    BySentence,
    /// Split on blank-line paragraph boundaries.
    ByParagraph,
}

impl Splitter {
    /// Stable string form carried in [`ChunkProvenance::splitter`].
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BySentence => "by_sentence",
            Self::ByParagraph => "by_paragraph",
        }
    }
}

/// Count of whitespace-delimited word tokens, used as a proxy for LLM
/// token count. Always at least 1 for non-empty input.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    WORD.find_iter(text).count().max(1)
}

fn split_units(text: &str, splitter: Splitter) -> Vec<String> {
    let boundary = match splitter {
        Splitter::BySentence => &*SENTENCE_BOUNDARY,
        Splitter::ByParagraph => &*PARAGRAPH_BOUNDARY,
    };
    boundary
        .split(text.trim())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Greedily pack `text` into chunks of at most `max_tokens` estimated
/// tokens, seeding each chunk after the first with the last `overlap`
/// words of the previous chunk.
#[must_use]
pub fn chunk_text(doc_id: &str, text: &str, max_tokens: usize, overlap: usize, splitter: Splitter) -> Vec<Chunk> {
    let units = split_units(text, splitter);
    if units.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    let mut finalize = |buf: &mut String, tokens: &mut usize, chunks: &mut Vec<Chunk>| {
        if buf.trim().is_empty() {
            return;
        }
        let text = buf.trim().to_string();
        let index = chunks.len();
        chunks.push(Chunk {
            id: chunk_id(doc_id, index, &text),
            doc_id: doc_id.to_string(),
            source_uri: String::new(),
            provenance: ChunkProvenance {
                index,
                splitter: splitter.as_str(),
                length_chars: text.chars().count(),
            },
            text,
        });
        buf.clear();
        *tokens = 0;
    };

    for unit in units {
        let unit_tokens = estimate_tokens(&unit);
        if current_tokens > 0 && current_tokens + unit_tokens > max_tokens {
            finalize(&mut current, &mut current_tokens, &mut chunks);
            if overlap > 0 {
                if let Some(prev) = chunks.last() {
                    let words: Vec<&str> = NON_SPACE.find_iter(&prev.text).map(|m| m.as_str()).collect();
                    let start = words.len().saturating_sub(overlap);
                    let seed = words[start..].join(" ");
                    if !seed.is_empty() {
                        current.push_str(&seed);
                        current.push(' ');
                        current_tokens = estimate_tokens(&seed);
                    }
                }
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&unit);
        current_tokens += unit_tokens;
    }
    finalize(&mut current, &mut current_tokens, &mut chunks);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_counts_words() {
        assert_eq!(estimate_tokens("hello world"), 2);
        assert_eq!(estimate_tokens(""), 1);
    }

    #[test]
    fn splits_into_multiple_chunks_when_over_budget() {
        let text = "Sentence one is here. Sentence two is here. Sentence three is here. Sentence four is here.";
        let chunks = chunk_text("doc_1", text, 6, 0, Splitter::BySentence);
        assert!(chunks.len() >= 2, "expected multiple chunks, got {}", chunks.len());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.provenance.index, i);
        }
    }

    #[test]
    fn single_chunk_when_under_budget() {
        let text = "A short sentence.";
        let chunks = chunk_text("doc_1", text, 100, 0, Splitter::BySentence);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short sentence.");
    }

    #[test]
    fn overlap_seeds_next_chunk_with_trailing_words() {
        let text = "alpha beta gamma delta epsilon. zeta eta theta iota kappa. lambda mu nu xi omicron.";
        let chunks = chunk_text("doc_1", text, 6, 2, Splitter::BySentence);
        assert!(chunks.len() >= 2);
        // second chunk should start with the last 2 words of the first chunk's text
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let overlap_words = &first_words[first_words.len() - 2..];
        for w in overlap_words {
            assert!(chunks[1].text.contains(w));
        }
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("doc_1", "", 100, 0, Splitter::BySentence).is_empty());
        assert!(chunk_text("doc_1", "   ", 100, 0, Splitter::BySentence).is_empty());
    }

    #[test]
    fn chunk_ids_are_stable_for_identical_text() {
        let a = chunk_text("doc_1", "Same text here.", 100, 0, Splitter::BySentence);
        let b = chunk_text("doc_1", "Same text here.", 100, 0, Splitter::BySentence);
        assert_eq!(a[0].id, b[0].id);
    }

    #[test]
    fn paragraph_splitter_breaks_on_blank_lines() {
        let text = "Para one.\n\nPara two.\n\nPara three.";
        let chunks = chunk_text("doc_1", text, 2, 0, Splitter::ByParagraph);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].provenance.splitter, "by_paragraph");
    }
}
