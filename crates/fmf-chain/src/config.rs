// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declarative chain-file schema (deserialized from YAML).

use serde::Deserialize;
use std::collections::BTreeMap;

fn default_concurrency() -> usize {
    4
}

fn default_group_size() -> usize {
    4
}

fn default_top_k_text() -> usize {
    3
}

fn default_top_k_images() -> usize {
    0
}

fn default_true() -> bool {
    true
}

/// Top-level chain file: one or more sequential steps over a single
/// input domain, plus declared output exports.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Chain name, used for logging and artefact provenance.
    pub name: String,
    /// Input domain the chain iterates over.
    pub inputs: InputsConfig,
    /// Ordered pipeline steps.
    pub steps: Vec<StepConfig>,
    /// Declared artefact exports, evaluated after all steps finish.
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    /// Bounded worker-pool size applied to every step.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Whether a unit failure is counted and skipped rather than fatal.
    #[serde(default)]
    pub continue_on_error: bool,
}

/// How a chain resolves its iteration domain (chunks, rows, or image groups).
#[derive(Debug, Clone, Deserialize)]
pub struct InputsConfig {
    /// Name of the configured connector to read from. Absent for `dataframe_rows`.
    #[serde(default)]
    pub connector: Option<String>,
    /// Include globs scoping which resources are read.
    #[serde(default)]
    pub select: Vec<String>,
    /// Iteration mode. Defaults to chunk mode.
    #[serde(default)]
    pub mode: Option<InputMode>,
    /// `table_rows` configuration.
    #[serde(default)]
    pub table: Option<TableConfig>,
    /// `images_group` configuration.
    #[serde(default)]
    pub images: Option<ImagesConfig>,
    /// Inline rows for `dataframe_rows` mode.
    #[serde(default)]
    pub rows: Vec<BTreeMap<String, serde_json::Value>>,
    /// Maximum tokens per chunk (chunk mode only).
    #[serde(default = "default_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    /// Token overlap between consecutive chunks (chunk mode only).
    #[serde(default)]
    pub chunk_overlap: usize,
    /// Splitting strategy (chunk mode only).
    #[serde(default)]
    pub splitter: SplitterConfig,
}

fn default_chunk_max_tokens() -> usize {
    400
}

/// Iteration domain selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Iterate rows read from a tabular connector resource.
    TableRows,
    /// Iterate rows given inline in the chain file.
    DataframeRows,
    /// Iterate fixed-size groups of image blobs.
    ImagesGroup,
}

/// Splitting strategy as named in a chain file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitterConfig {
    /// Split on sentence boundaries.
    #[default]
    BySentence,
    /// Split on paragraph boundaries.
    ByParagraph,
    /// No splitting; one chunk per document.
    None,
}

/// `table_rows` mode configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Column(s) used to derive each row's `text` field.
    #[serde(default)]
    pub text_column: Option<TextColumnConfig>,
    /// Column allow-list; absent means all columns are kept.
    #[serde(default)]
    pub pass_through: Option<Vec<String>>,
}

/// A single column name, or several to be joined, for row text derivation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextColumnConfig {
    /// A single column name.
    Single(String),
    /// Several column names, space-joined in order.
    Joined(Vec<String>),
}

/// `images_group` mode configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    /// Maximum images per group; the final group may be smaller.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
}

/// A single chain step: a prompt invocation over every unit in the
/// iteration domain.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Step id, used in logs, telemetry, and `all.<id>` references.
    pub id: String,
    /// Prompt reference: `"inline: ..."`, `"path#version"`, or `"id#version"`.
    pub prompt: String,
    /// Named input expressions resolved into template variables.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Output binding.
    pub output: OutputConfig,
    /// Sampling parameter overrides.
    #[serde(default)]
    pub params: StepParams,
    /// Step mode; `multimodal` assembles image parts alongside text.
    #[serde(default)]
    pub mode: StepMode,
    /// Inference mode override for this step.
    #[serde(default)]
    pub infer: InferConfig,
    /// Optional retrieval augmentation.
    #[serde(default)]
    pub rag: Option<RagStepConfig>,
}

/// Output binding for a step, accepting either a bare name or a structured form.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputConfig {
    /// `output: <name>` — plain text output, no enforcement.
    Name(String),
    /// Structured form with JSON enforcement.
    Spec(OutputSpecDetail),
}

impl OutputConfig {
    /// The output's binding name, visible to later steps as `all.<name>`.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Spec(spec) => &spec.name,
        }
    }

    /// Whether this step's completions are JSON-enforced.
    #[must_use]
    pub fn expects_json(&self) -> bool {
        matches!(self, Self::Spec(spec) if spec.expects.as_deref() == Some("json"))
    }

    /// Schema to validate against, if any.
    #[must_use]
    pub fn schema(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Spec(spec) => spec.schema.as_ref(),
            Self::Name(_) => None,
        }
    }

    /// Bounded repair-retry budget for JSON enforcement.
    #[must_use]
    pub fn parse_retries(&self) -> u32 {
        match self {
            Self::Spec(spec) => spec.parse_retries.unwrap_or(0),
            Self::Name(_) => 0,
        }
    }
}

/// Structured `output:` block.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpecDetail {
    /// Output binding name.
    pub name: String,
    /// `"json"` to enable enforcement; absent means plain text.
    #[serde(default)]
    pub expects: Option<String>,
    /// Minimal schema (`type`, `required`) validated on successful parse.
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    /// Repair-pass budget when the first strict parse fails.
    #[serde(default)]
    pub parse_retries: Option<u32>,
}

/// Sampling parameter overrides for a step.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepParams {
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Whether a step sends a single text part or text-plus-image parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Text-only messages.
    #[default]
    Text,
    /// Text plus one image part per retained blob.
    Multimodal,
}

/// Inference mode override, mirroring `fmf_runtime::InferenceMode`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InferConfig {
    /// `auto` (default), `regular`, or `stream`.
    #[serde(default)]
    pub mode: Option<String>,
}

/// Retrieval-augmentation configuration attached to a step.
#[derive(Debug, Clone, Deserialize)]
pub struct RagStepConfig {
    /// Name of the configured RAG pipeline to query.
    pub pipeline: String,
    /// Query expression; defaults to the current chunk/row/group text.
    #[serde(default)]
    pub query: Option<String>,
    /// Maximum text chunks to retrieve.
    #[serde(default = "default_top_k_text")]
    pub top_k_text: usize,
    /// Maximum images to retrieve.
    #[serde(default = "default_top_k_images")]
    pub top_k_images: usize,
    /// Template variable name bound to the rendered text context.
    #[serde(default = "default_text_var")]
    pub text_var: String,
    /// Template variable name bound to retrieved image data URLs.
    #[serde(default = "default_image_var")]
    pub image_var: String,
    /// Whether a "Retrieved context:" block is appended to the rendered
    /// prompt body automatically.
    #[serde(default = "default_true")]
    pub inject_prompt: bool,
}

fn default_text_var() -> String {
    "rag_text".to_string()
}

fn default_image_var() -> String {
    "rag_images".to_string()
}

/// A declared artefact export, evaluated once all steps finish.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputSpec {
    /// Write a step's output list to a file.
    Save {
        /// Destination path; `${run_id}` is substituted.
        save: String,
        /// Step output name the export reads from.
        from: String,
        /// Serialization format.
        #[serde(rename = "as")]
        as_format: ExportFormat,
    },
    /// Forward a step's output list to a named external sink.
    Export {
        /// Configured sink name.
        export: String,
        /// Step output name the export reads from.
        from: String,
    },
}

/// Serialization format for a `save` export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON object per line.
    Jsonl,
    /// Comma-separated values (requires object-shaped rows).
    Csv,
    /// Parquet columnar format.
    Parquet,
}
