// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-mode enforcement for chain step outputs: a strict parse, a bounded
//! repair pass for fenced/prefixed completions, and minimal schema
//! validation (`type: object`, `required: [...]`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fmf_telemetry::Metrics;
use serde_json::Value;

/// The outcome of enforcing JSON-mode on a single completion.
#[derive(Debug, Clone, PartialEq)]
pub enum EnforcedJson {
    /// Parsing (after any repair attempts) and schema validation succeeded.
    Ok(Value),
    /// Every parse attempt failed; `raw_text` preserves the original
    /// completion so the run is not silently dropped.
    ParseFailed {
        /// The original, unrepaired completion text.
        raw_text: String,
    },
    /// Parsing succeeded but the result failed minimal schema validation.
    SchemaFailed {
        /// The original, unrepaired completion text.
        raw_text: String,
        /// Human-readable description of the schema violation.
        schema_error: String,
    },
}

impl EnforcedJson {
    /// Render this outcome as the JSON value that is written to the
    /// step's output artefact, mirroring the sentinel shape used on
    /// failure (`{"parse_error": true, "raw_text": ..., ["schema_error": ...]}`).
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Ok(value) => value,
            Self::ParseFailed { raw_text } => serde_json::json!({
                "parse_error": true,
                "raw_text": raw_text,
            }),
            Self::SchemaFailed { raw_text, schema_error } => serde_json::json!({
                "parse_error": true,
                "raw_text": raw_text,
                "schema_error": schema_error,
            }),
        }
    }

    /// `true` if this outcome represents a successfully enforced value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

fn try_parse_json(text: &str) -> Result<Value, String> {
    serde_json::from_str(text).map_err(|e| e.to_string())
}

/// Strip common code-fence wrapping and narrow to the first top-level
/// object, best-effort. Never fails; returns the narrowed text even if
/// no valid JSON results.
#[must_use]
pub fn repair_json(text: &str) -> String {
    let mut t = text.trim().to_string();
    if t.starts_with("```") {
        let mut lines: Vec<&str> = t.lines().collect();
        if !lines.is_empty() {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.trim_end() == "```") {
            lines.pop();
        }
        t = lines.join("\n");
    }
    if let (Some(start), Some(end)) = (t.find('{'), t.rfind('}')) {
        if end > start {
            return t[start..=end].to_string();
        }
    }
    t
}

/// Minimal schema validation: supports `type: "object"` and
/// `required: [...]` keys, matching the subset of JSON Schema the
/// framework enforces against model completions.
pub fn validate_min_schema(value: &Value, schema: Option<&Value>) -> Result<(), String> {
    let Some(schema) = schema else {
        return Ok(());
    };
    if schema.get("type").and_then(Value::as_str) == Some("object") && !value.is_object() {
        return Err("schema.type=object but got non-object".to_string());
    }
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        if let Some(obj) = value.as_object() {
            let missing: Vec<&str> = required
                .iter()
                .filter_map(Value::as_str)
                .filter(|k| !obj.contains_key(*k))
                .collect();
            if !missing.is_empty() {
                return Err(format!("missing required keys: {}", missing.join(", ")));
            }
        }
    }
    Ok(())
}

/// Enforce JSON-mode on `raw_text`: parse it, retrying up to
/// `parse_retries` times against a repaired rewrite of the text on
/// failure, then validate the result against `schema`. Records a
/// `json_parse_failures` metric (overall and per `step_id`) on any
/// terminal failure.
pub fn enforce_json(raw_text: &str, parse_retries: u32, schema: Option<&Value>, step_id: &str, metrics: &Metrics) -> EnforcedJson {
    let mut parsed = try_parse_json(raw_text);
    let mut attempts = 0;
    while parsed.is_err() && attempts < parse_retries {
        let repaired = repair_json(raw_text);
        parsed = try_parse_json(&repaired);
        attempts += 1;
    }

    let Ok(value) = parsed else {
        metrics.record_json_parse_failure(step_id);
        return EnforcedJson::ParseFailed { raw_text: raw_text.to_string() };
    };

    if let Err(schema_error) = validate_min_schema(&value, schema) {
        metrics.record_json_parse_failure(step_id);
        return EnforcedJson::SchemaFailed { raw_text: raw_text.to_string(), schema_error };
    }

    EnforcedJson::Ok(value)
}
