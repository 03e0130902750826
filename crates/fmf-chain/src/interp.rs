// SPDX-License-Identifier: MIT OR Apache-2.0
//! `${...}` input-expression resolution and `{{ }}` template rendering
//! against a per-unit ambient context.

use fmf_error::FmfError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Caps applied when an aggregated (list-valued) expression is rendered
/// into template text. Exposed as explicit configuration rather than read
/// from the environment directly, so callers can vary limits per chain
/// without touching process-global state.
#[derive(Debug, Clone, Copy)]
pub struct JoinLimits {
    /// Maximum character count before a `… [truncated]` marker is appended.
    pub max_chars: Option<usize>,
    /// Maximum item count before a `… [+N more]` marker is appended.
    pub max_items: Option<usize>,
}

impl Default for JoinLimits {
    fn default() -> Self {
        Self { max_chars: None, max_items: None }
    }
}

impl JoinLimits {
    /// Build limits from the engine's environment-variable overrides
    /// (`FMF_JOIN_MAX_CHARS`, `FMF_JOIN_MAX_ITEMS`), falling back to
    /// unbounded when unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let max_chars = std::env::var("FMF_JOIN_MAX_CHARS").ok().and_then(|v| v.parse().ok());
        let max_items = std::env::var("FMF_JOIN_MAX_ITEMS").ok().and_then(|v| v.parse().ok());
        Self { max_chars, max_items }
    }
}

fn resolve_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn sample_items(items: &[String], limits: JoinLimits) -> Vec<String> {
    let Some(max) = limits.max_items else { return items.to_vec() };
    if items.len() <= max {
        return items.to_vec();
    }
    let mut sampled: Vec<String> = items[..max].to_vec();
    sampled.push(format!("… [+{} more]", items.len() - max));
    sampled
}

fn truncate_chars(text: &str, limits: JoinLimits) -> String {
    let Some(max) = limits.max_chars else { return text.to_string() };
    if text.chars().count() <= max {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max).collect();
    format!("{truncated}… [truncated]")
}

/// Render a resolved JSON value as template text: strings pass through
/// (truncated to `max_chars`); arrays are joined with `\n` (sampled to
/// `max_items` first); everything else is serialized compactly.
#[must_use]
pub fn stringify_value(value: &Value, limits: JoinLimits) -> String {
    match value {
        Value::String(s) => truncate_chars(s, limits),
        Value::Array(items) => {
            let strings: Vec<String> = items.iter().map(|v| stringify_value(v, limits)).collect();
            truncate_chars(&sample_items(&strings, limits).join("\n"), limits)
        }
        Value::Null => String::new(),
        other => truncate_chars(&other.to_string(), limits),
    }
}

fn split_join_call(expr: &str) -> Option<(&str, &str)> {
    let inner = expr.strip_prefix("join(")?.strip_suffix(')')?;
    let (arg, sep_literal) = inner.split_once(',')?;
    let sep = sep_literal.trim();
    let sep = sep.strip_prefix('"').unwrap_or(sep);
    let sep = sep.strip_suffix('"').unwrap_or(sep);
    Some((arg.trim(), sep))
}

/// Evaluate a single `${...}`-stripped expression (the path or `join(...)`
/// call between the braces) against `context`.
pub fn eval_expr(expr: &str, context: &Value) -> Result<Value, FmfError> {
    let expr = expr.trim();
    if let Some((path, sep)) = split_join_call(expr) {
        let resolved = resolve_path(context, path)
            .ok_or_else(|| FmfError::config(format!("unresolved interpolation path: {path}")))?;
        let joined = match resolved {
            Value::Array(items) => items.iter().map(|v| stringify_value(v, JoinLimits::default())).collect::<Vec<_>>().join(sep),
            Value::String(s) => s.lines().collect::<Vec<_>>().join(sep),
            other => stringify_value(other, JoinLimits::default()),
        };
        return Ok(Value::String(joined));
    }
    resolve_path(context, expr).cloned().ok_or_else(|| FmfError::config(format!("unresolved interpolation path: {expr}")))
}

/// Evaluate one input entry's value: `"${...}"` expressions are resolved
/// against `context`; anything else is treated as a literal string.
pub fn eval_input_value(raw: &str, context: &Value, limits: JoinLimits) -> Result<String, FmfError> {
    let trimmed = raw.trim();
    if let Some(inner) = trimmed.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        let value = eval_expr(inner, context)?;
        return Ok(stringify_value(&value, limits));
    }
    Ok(raw.to_string())
}

/// Resolve every entry of a step's `inputs:` map into template variables.
pub fn resolve_inputs(
    raw_inputs: &BTreeMap<String, String>,
    context: &Value,
    limits: JoinLimits,
) -> Result<BTreeMap<String, String>, FmfError> {
    raw_inputs.iter().map(|(name, raw)| Ok((name.clone(), eval_input_value(raw, context, limits)?))).collect()
}

/// Render a `{{ name }}` prompt template against resolved variables.
#[must_use]
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> String {
    fmf_prompt::render_simple(template, vars)
}
