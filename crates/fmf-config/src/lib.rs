// SPDX-License-Identifier: MIT OR Apache-2.0
//! Root configuration loading, validation, and merging for the engine.
//!
//! This crate provides [`EngineConfig`] — the top-level settings a CLI or
//! embedder resolves before building a chain executor — together with
//! helpers for loading from YAML, overlaying named profiles, applying
//! environment overrides, and producing advisory [`ConfigWarning`]s.
//!
//! This is deliberately thin: it covers only what the executor itself
//! consumes (connector/provider catalogs, artefact and cost settings,
//! logging). A fuller schema loader, secret-resolution providers, and a
//! fluent builder API are treated as external collaborators.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid YAML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },

    /// The requested named profile does not exist.
    #[error("unknown profile: {name}")]
    UnknownProfile {
        /// Profile name that was requested.
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// No providers are configured at all.
    NoProvidersConfigured,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::NoProvidersConfigured => {
                write!(f, "no providers configured; chains cannot run inference steps")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level engine configuration: the catalog of connectors and providers
/// a chain file can reference by name, plus run-wide defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EngineConfig {
    /// Directory artefacts are written under. Defaults to `"artefacts"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artefacts_dir: Option<String>,
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Log output format: `"json"` or `"human"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    /// Content-addressed ID hash algorithm: `"blake2b"` or `"xxh64"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_algo: Option<String>,
    /// How many most-recent runs `apply_retention` keeps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_last: Option<i64>,
    /// Default provider pricing, used to estimate a run's dollar cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostConfig>,
    /// Named connector definitions, referenced by a chain's `inputs.connector`.
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorConfig>,
    /// Named provider definitions, referenced by `--provider` or a profile.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Named RAG pipeline definitions, built lazily when a chain step
    /// references them by name.
    #[serde(default)]
    pub rag_pipelines: BTreeMap<String, RagPipelineDef>,
    /// Named profile overlays, applied on top of the base config.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileOverlay>,
}

/// A named RAG pipeline definition: which connector backs it, and how its
/// in-memory index is built.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct RagPipelineDef {
    /// Name of the configured connector this pipeline indexes.
    pub connector: String,
    /// Include globs scoping which resources are indexed.
    #[serde(default)]
    pub select: Vec<String>,
    /// Exclude globs scoping which resources are skipped.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Which modalities to index.
    #[serde(default)]
    pub modalities: RagModalityConfig,
    /// Cap on the number of text chunks indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_text_items: Option<usize>,
    /// Cap on the number of image blobs indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_image_items: Option<usize>,
    /// Maximum tokens per indexed chunk.
    #[serde(default = "default_rag_chunk_max_tokens")]
    pub chunk_max_tokens: usize,
    /// Token overlap between consecutive indexed chunks.
    #[serde(default)]
    pub chunk_overlap: usize,
    /// Splitting strategy used when indexing text.
    #[serde(default)]
    pub splitter: RagSplitterConfig,
}

fn default_rag_chunk_max_tokens() -> usize {
    400
}

/// Which modalities a RAG pipeline indexes, as named in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RagModalityConfig {
    /// Index chunked document text only.
    #[default]
    Text,
    /// Index image blobs only.
    Image,
    /// Index both text chunks and image blobs.
    Both,
}

/// Splitting strategy for RAG indexing, as named in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RagSplitterConfig {
    /// Split on sentence boundaries.
    #[default]
    BySentence,
    /// Split on paragraph boundaries.
    ByParagraph,
}

/// Per-1,000-token pricing.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CostConfig {
    /// Dollars per 1,000 prompt tokens.
    pub prompt_per_1k: f64,
    /// Dollars per 1,000 completion tokens.
    pub completion_per_1k: f64,
}

/// A named connector definition.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorConfig {
    /// Local filesystem connector, rooted at `root`.
    Fs {
        /// Root directory resources are resolved relative to.
        root: String,
    },
    /// S3-like object store connector.
    S3 {
        /// Base URL of the S3-compatible endpoint.
        base_url: String,
        /// Bucket name.
        bucket: String,
        /// Key prefix all resources share.
        #[serde(default)]
        prefix: String,
        /// Whether objects in this bucket require server-side KMS encryption.
        #[serde(default)]
        kms_required: bool,
    },
    /// SharePoint-like drive connector.
    Sharepoint {
        /// Drive or site identifier.
        drive_id: String,
        /// Folder path resources are resolved relative to.
        #[serde(default)]
        folder: String,
    },
}

/// A named inference provider definition.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Azure-OpenAI-like chat completion endpoint.
    Openai {
        /// Chat completion endpoint URL.
        endpoint: String,
        /// Deployment or model name.
        model: String,
        /// API version query parameter (Azure) or `"v1"` for plain OpenAI.
        #[serde(default = "default_api_version")]
        api_version: String,
        /// Environment variable holding the API key.
        #[serde(default = "default_openai_key_env")]
        api_key_env: String,
        /// Requests per second allowed against this deployment.
        #[serde(default = "default_rate_per_sec")]
        rate_per_sec: f64,
    },
    /// Bedrock-like chat completion provider.
    Bedrock {
        /// Endpoint of a Bedrock-runtime-compatible proxy.
        endpoint: String,
        /// Bedrock model id.
        model: String,
        /// Environment variable holding the bearer credential.
        #[serde(default = "default_bedrock_key_env")]
        api_key_env: String,
        /// Requests per second allowed against this model.
        #[serde(default = "default_rate_per_sec")]
        rate_per_sec: f64,
        /// Whether server-side streaming is attempted for `auto`/`stream` steps.
        #[serde(default)]
        streaming: bool,
    },
}

fn default_openai_key_env() -> String {
    "FMF_OPENAI_API_KEY".to_string()
}

fn default_bedrock_key_env() -> String {
    "FMF_BEDROCK_API_KEY".to_string()
}

fn default_api_version() -> String {
    "v1".to_string()
}

fn default_rate_per_sec() -> f64 {
    5.0
}

/// A named profile: partial overrides applied on top of the base config.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ProfileOverlay {
    /// Overrides [`EngineConfig::artefacts_dir`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artefacts_dir: Option<String>,
    /// Overrides [`EngineConfig::log_level`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Overrides [`EngineConfig::log_format`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_format: Option<String>,
    /// Overrides [`EngineConfig::retain_last`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_last: Option<i64>,
    /// Overrides [`EngineConfig::cost`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostConfig>,
    /// Additional or replacement connector definitions.
    #[serde(default)]
    pub connectors: BTreeMap<String, ConnectorConfig>,
    /// Additional or replacement provider definitions.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Additional or replacement RAG pipeline definitions.
    #[serde(default)]
    pub rag_pipelines: BTreeMap<String, RagPipelineDef>,
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Recognised log output formats.
const VALID_LOG_FORMATS: &[&str] = &["json", "human"];

/// Recognised hash algorithms.
const VALID_HASH_ALGOS: &[&str] = &["blake2b", "xxh64"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load an [`EngineConfig`] from an optional YAML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`EngineConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases, giving
/// the precedence order: file defaults, profile overlay (via
/// [`apply_profile`]), environment overrides (this function), explicit
/// per-run overrides (left to the caller).
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound { path: p.display().to_string() })?;
            parse_yaml(&content)?
        }
        None => EngineConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a YAML string into an [`EngineConfig`].
pub fn parse_yaml(content: &str) -> Result<EngineConfig, ConfigError> {
    serde_yaml::from_str::<EngineConfig>(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `FMF_LOG_LEVEL`
/// - `FMF_LOG_FORMAT`
/// - `FMF_HASH_ALGO`
/// - `FMF_ARTEFACTS_DIR`
/// - `FMF_ARTEFACTS__RETAIN_LAST`
/// - `FMF_COST_PROMPT_PER_1K`, `FMF_COST_COMPLETION_PER_1K` (both required
///   together to populate [`EngineConfig::cost`])
pub fn apply_env_overrides(config: &mut EngineConfig) {
    if let Ok(val) = std::env::var("FMF_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Ok(val) = std::env::var("FMF_LOG_FORMAT") {
        config.log_format = Some(val);
    }
    if let Ok(val) = std::env::var("FMF_HASH_ALGO") {
        config.hash_algo = Some(val);
    }
    if let Ok(val) = std::env::var("FMF_ARTEFACTS_DIR") {
        config.artefacts_dir = Some(val);
    }
    if let Ok(val) = std::env::var("FMF_ARTEFACTS__RETAIN_LAST")
        && let Ok(n) = val.parse()
    {
        config.retain_last = Some(n);
    }
    if let (Ok(prompt), Ok(completion)) = (std::env::var("FMF_COST_PROMPT_PER_1K"), std::env::var("FMF_COST_COMPLETION_PER_1K"))
        && let (Ok(prompt_per_1k), Ok(completion_per_1k)) = (prompt.parse(), completion.parse())
    {
        config.cost = Some(CostConfig { prompt_per_1k, completion_per_1k });
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (unrecognised enum values) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &EngineConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }
    if let Some(ref format) = config.log_format
        && !VALID_LOG_FORMATS.contains(&format.as_str())
    {
        errors.push(format!("invalid log_format '{format}'"));
    }
    if let Some(ref algo) = config.hash_algo
        && !VALID_HASH_ALGOS.contains(&algo.as_str())
    {
        errors.push(format!("invalid hash_algo '{algo}'"));
    }
    if let Some(retain) = config.retain_last
        && retain < 0
    {
        errors.push(format!("retain_last must not be negative, got {retain}"));
    }

    for (name, connector) in &config.connectors {
        if name.is_empty() {
            errors.push("connector name must not be empty".into());
        }
        if let ConnectorConfig::Fs { root } = connector
            && root.trim().is_empty()
        {
            errors.push(format!("connector '{name}': fs root must not be empty"));
        }
    }
    for (name, provider) in &config.providers {
        if name.is_empty() {
            errors.push("provider name must not be empty".into());
        }
        if let ProviderConfig::Openai { endpoint, .. } = provider
            && endpoint.trim().is_empty()
        {
            errors.push(format!("provider '{name}': endpoint must not be empty"));
        }
    }
    for (name, rag) in &config.rag_pipelines {
        if name.is_empty() {
            errors.push("rag pipeline name must not be empty".into());
        }
        if !config.connectors.contains_key(&rag.connector) {
            errors.push(format!("rag pipeline '{name}' references unknown connector '{}'", rag.connector));
        }
    }
    for name in config.profiles.keys() {
        if name.is_empty() {
            errors.push("profile name must not be empty".into());
        }
    }

    if config.providers.is_empty() {
        warnings.push(ConfigWarning::NoProvidersConfigured);
    }
    if config.artefacts_dir.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "artefacts_dir".into(),
            hint: "defaults to './artefacts'".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Apply a named profile overlay on top of `base`.
///
/// Scalar fields present in the overlay replace `base`'s; connector and
/// provider maps are deep-merged, with the overlay entry winning on a name
/// collision.
pub fn apply_profile(base: EngineConfig, profile_name: &str) -> Result<EngineConfig, ConfigError> {
    let overlay = base
        .profiles
        .get(profile_name)
        .cloned()
        .ok_or_else(|| ConfigError::UnknownProfile { name: profile_name.to_string() })?;
    let mut connectors = base.connectors.clone();
    connectors.extend(overlay.connectors);
    let mut providers = base.providers.clone();
    providers.extend(overlay.providers);
    let mut rag_pipelines = base.rag_pipelines.clone();
    rag_pipelines.extend(overlay.rag_pipelines);
    Ok(EngineConfig {
        artefacts_dir: overlay.artefacts_dir.or(base.artefacts_dir),
        log_level: overlay.log_level.or(base.log_level),
        log_format: overlay.log_format.or(base.log_format),
        hash_algo: base.hash_algo,
        retain_last: overlay.retain_last.or(base.retain_last),
        cost: overlay.cost.or(base.cost),
        connectors,
        providers,
        rag_pipelines,
        profiles: base.profiles,
    })
}

/// Merge two configurations. Values in `overlay` take precedence over `base`.
///
/// Connector and provider maps are combined; on name collisions the overlay
/// entry wins. Profile maps are combined the same way.
pub fn merge_configs(base: EngineConfig, overlay: EngineConfig) -> EngineConfig {
    let mut connectors = base.connectors;
    connectors.extend(overlay.connectors);
    let mut providers = base.providers;
    providers.extend(overlay.providers);
    let mut rag_pipelines = base.rag_pipelines;
    rag_pipelines.extend(overlay.rag_pipelines);
    let mut profiles = base.profiles;
    profiles.extend(overlay.profiles);
    EngineConfig {
        artefacts_dir: overlay.artefacts_dir.or(base.artefacts_dir),
        log_level: overlay.log_level.or(base.log_level),
        log_format: overlay.log_format.or(base.log_format),
        hash_algo: overlay.hash_algo.or(base.hash_algo),
        retain_last: overlay.retain_last.or(base.retain_last),
        cost: overlay.cost.or(base.cost),
        connectors,
        providers,
        rag_pipelines,
        profiles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_no_providers_warning() {
        let cfg = EngineConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(warnings.contains(&ConfigWarning::NoProvidersConfigured));
    }

    #[test]
    fn parse_valid_yaml_string() {
        let yaml = r#"
artefacts_dir: artefacts
log_level: debug
connectors:
  docs:
    type: fs
    root: /data/docs
providers:
  main:
    type: openai
    endpoint: https://example.openai.azure.com
    model: gpt-4o
"#;
        let cfg = parse_yaml(yaml).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.connectors.len(), 1);
        assert_eq!(cfg.providers.len(), 1);
        match &cfg.providers["main"] {
            ProviderConfig::Openai { api_key_env, .. } => assert_eq!(api_key_env, "FMF_OPENAI_API_KEY"),
            other => panic!("expected Openai, got {other:?}"),
        }
    }

    #[test]
    fn parse_invalid_yaml_gives_parse_error() {
        let bad = "not: [valid, yaml: structure";
        let err = parse_yaml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_invalid_log_level() {
        let cfg = EngineConfig { log_level: Some("verbose".into()), ..Default::default() };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_negative_retain_last() {
        let cfg = EngineConfig { retain_last: Some(-1), ..Default::default() };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_empty_fs_root() {
        let mut cfg = EngineConfig::default();
        cfg.connectors.insert("docs".into(), ConnectorConfig::Fs { root: "  ".into() });
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => assert!(reasons.iter().any(|r| r.contains("root must not be empty"))),
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn merge_overlay_overrides_base_scalars() {
        let base = EngineConfig { log_level: Some("info".into()), retain_last: Some(5), ..Default::default() };
        let overlay = EngineConfig { log_level: Some("debug".into()), ..Default::default() };
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        assert_eq!(merged.retain_last, Some(5));
    }

    #[test]
    fn merge_combines_connector_maps_overlay_wins_on_collision() {
        let base = EngineConfig {
            connectors: BTreeMap::from([("docs".into(), ConnectorConfig::Fs { root: "/old".into() })]),
            ..Default::default()
        };
        let overlay = EngineConfig {
            connectors: BTreeMap::from([("docs".into(), ConnectorConfig::Fs { root: "/new".into() })]),
            ..Default::default()
        };
        let merged = merge_configs(base, overlay);
        match &merged.connectors["docs"] {
            ConnectorConfig::Fs { root } => assert_eq!(root, "/new"),
            other => panic!("expected Fs, got {other:?}"),
        }
    }

    #[test]
    fn apply_profile_overlays_named_profile() {
        let mut cfg = EngineConfig { log_level: Some("info".into()), ..Default::default() };
        cfg.profiles.insert("staging".into(), ProfileOverlay { log_level: Some("debug".into()), ..Default::default() });
        let resolved = apply_profile(cfg, "staging").unwrap();
        assert_eq!(resolved.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn apply_profile_unknown_name_errors() {
        let cfg = EngineConfig::default();
        let err = apply_profile(cfg, "missing").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile { .. }));
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fmf.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "log_level: warn\nartefacts_dir: out").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("warn"));
        assert_eq!(cfg.artefacts_dir.as_deref(), Some("out"));
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/fmf.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert!(cfg.connectors.is_empty());
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_overrides_apply_on_top_of_file_config() {
        // SAFETY: single-threaded test, var is unset before and after.
        unsafe {
            std::env::set_var("FMF_LOG_LEVEL", "trace");
        }
        let mut cfg = EngineConfig { log_level: Some("info".into()), ..Default::default() };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.log_level.as_deref(), Some("trace"));
        unsafe {
            std::env::remove_var("FMF_LOG_LEVEL");
        }
    }
}
