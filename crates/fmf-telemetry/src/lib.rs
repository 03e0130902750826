// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Run-level metrics collection, emitted into the run manifest on completion.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// Atomic counters accumulated over the lifetime of a single chain run.
///
/// All counters use relaxed-ish `SeqCst` increments; contention is expected
/// to be low (one increment per step/document/call), so correctness is
/// favored over throughput.
#[derive(Debug, Default)]
pub struct Metrics {
    documents_loaded: AtomicU64,
    chunks_produced: AtomicU64,
    rows_processed: AtomicU64,
    image_groups_processed: AtomicU64,
    steps_executed: AtomicU64,
    provider_calls: AtomicU64,
    provider_retries: AtomicU64,
    tokens_prompt: AtomicU64,
    tokens_completion: AtomicU64,
    streaming_used: AtomicU64,
    streaming_fallback: AtomicU64,
    json_parse_failures: AtomicU64,
    json_parse_failures_by_step: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    /// Construct an all-zero counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a document finished loading.
    pub fn record_document_loaded(&self) {
        self.documents_loaded.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that `n` chunks were produced from a document.
    pub fn record_chunks_produced(&self, n: u64) {
        self.chunks_produced.fetch_add(n, Ordering::SeqCst);
    }

    /// Record that a table row was processed.
    pub fn record_row_processed(&self) {
        self.rows_processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that an image group was processed.
    pub fn record_image_group_processed(&self) {
        self.image_groups_processed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that a chain step finished executing over all its inputs.
    pub fn record_step_executed(&self) {
        self.steps_executed.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a single completed provider call (after all retries).
    pub fn record_provider_call(&self, retries: u64, streaming: bool, fell_back: bool) {
        self.provider_calls.fetch_add(1, Ordering::SeqCst);
        self.provider_retries.fetch_add(retries, Ordering::SeqCst);
        if streaming {
            self.streaming_used.fetch_add(1, Ordering::SeqCst);
        }
        if fell_back {
            self.streaming_fallback.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Record token usage from a completion.
    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.tokens_prompt.fetch_add(prompt, Ordering::SeqCst);
        self.tokens_completion.fetch_add(completion, Ordering::SeqCst);
    }

    /// Record a terminal JSON-enforcement failure for `step_id`.
    pub fn record_json_parse_failure(&self, step_id: &str) {
        self.json_parse_failures.fetch_add(1, Ordering::SeqCst);
        let mut by_step = self
            .json_parse_failures_by_step
            .lock()
            .expect("metrics mutex poisoned");
        *by_step.entry(step_id.to_string()).or_insert(0) += 1;
    }

    /// Snapshot all counters into a serializable, point-in-time view.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_loaded: self.documents_loaded.load(Ordering::SeqCst),
            chunks_produced: self.chunks_produced.load(Ordering::SeqCst),
            rows_processed: self.rows_processed.load(Ordering::SeqCst),
            image_groups_processed: self.image_groups_processed.load(Ordering::SeqCst),
            steps_executed: self.steps_executed.load(Ordering::SeqCst),
            provider_calls: self.provider_calls.load(Ordering::SeqCst),
            provider_retries: self.provider_retries.load(Ordering::SeqCst),
            tokens_prompt: self.tokens_prompt.load(Ordering::SeqCst),
            tokens_completion: self.tokens_completion.load(Ordering::SeqCst),
            streaming_used: self.streaming_used.load(Ordering::SeqCst),
            streaming_fallback: self.streaming_fallback.load(Ordering::SeqCst),
            json_parse_failures: self.json_parse_failures.load(Ordering::SeqCst),
            json_parse_failures_by_step: self
                .json_parse_failures_by_step
                .lock()
                .expect("metrics mutex poisoned")
                .clone(),
        }
    }
}

/// A point-in-time, serializable view of [`Metrics`], embedded in the run manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Documents successfully loaded and normalized.
    pub documents_loaded: u64,
    /// Text chunks produced across all documents.
    pub chunks_produced: u64,
    /// Table rows processed (row input mode).
    pub rows_processed: u64,
    /// Image groups processed (image input mode).
    pub image_groups_processed: u64,
    /// Chain steps executed to completion.
    pub steps_executed: u64,
    /// Provider calls completed (each counts once regardless of retries).
    pub provider_calls: u64,
    /// Total retry attempts across all provider calls.
    pub provider_retries: u64,
    /// Prompt tokens billed.
    pub tokens_prompt: u64,
    /// Completion tokens billed.
    pub tokens_completion: u64,
    /// Calls that used streaming mode.
    pub streaming_used: u64,
    /// Calls that fell back from streaming to regular mode.
    pub streaming_fallback: u64,
    /// Total JSON-enforcement terminal failures.
    pub json_parse_failures: u64,
    /// JSON-enforcement terminal failures, keyed by step id.
    pub json_parse_failures_by_step: BTreeMap<String, u64>,
}

/// A structured span for tracing integration, used for one-off events that
/// don't fit the counter model above (e.g. connector retries, cache hits).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySpan {
    /// Span name / operation.
    pub name: String,
    /// Arbitrary key-value attributes (deterministic ordering).
    pub attributes: BTreeMap<String, String>,
}

impl TelemetrySpan {
    /// Create a new span with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Insert an attribute, returning `self` for chaining.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Emit the span via `tracing::info!`.
    pub fn emit(&self) {
        info!(span_name = %self.name, attributes = ?self.attributes, "telemetry_span");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let m = Metrics::new();
        let s = m.snapshot();
        assert_eq!(s.documents_loaded, 0);
        assert_eq!(s.json_parse_failures, 0);
    }

    #[test]
    fn document_and_chunk_counters_accumulate() {
        let m = Metrics::new();
        m.record_document_loaded();
        m.record_document_loaded();
        m.record_chunks_produced(5);
        let s = m.snapshot();
        assert_eq!(s.documents_loaded, 2);
        assert_eq!(s.chunks_produced, 5);
    }

    #[test]
    fn provider_call_tracks_retries_and_streaming() {
        let m = Metrics::new();
        m.record_provider_call(2, true, false);
        m.record_provider_call(0, false, true);
        let s = m.snapshot();
        assert_eq!(s.provider_calls, 2);
        assert_eq!(s.provider_retries, 2);
        assert_eq!(s.streaming_used, 1);
        assert_eq!(s.streaming_fallback, 1);
    }

    #[test]
    fn json_parse_failures_tracked_globally_and_per_step() {
        let m = Metrics::new();
        m.record_json_parse_failure("summarize");
        m.record_json_parse_failure("summarize");
        m.record_json_parse_failure("classify");
        let s = m.snapshot();
        assert_eq!(s.json_parse_failures, 3);
        assert_eq!(s.json_parse_failures_by_step["summarize"], 2);
        assert_eq!(s.json_parse_failures_by_step["classify"], 1);
    }

    #[test]
    fn snapshot_serializes_deterministically() {
        let m = Metrics::new();
        m.record_json_parse_failure("b");
        m.record_json_parse_failure("a");
        let json = serde_json::to_string(&m.snapshot()).unwrap();
        let pos_a = json.find("\"a\"").unwrap();
        let pos_b = json.find("\"b\"").unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn telemetry_span_attributes() {
        let span = TelemetrySpan::new("connector.retry").with_attribute("attempt", "2");
        assert_eq!(span.attributes["attempt"], "2");
    }
}
