// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared command implementations for the chain executor CLI.
//!
//! These functions are library-level so they can be tested without
//! spawning the binary.

use anyhow::{Context, Result};
use fmf_chain::ChainConfig;
use fmf_config::EngineConfig;
use schemars::schema_for;
use std::path::Path;

/// Schema types that can be printed by the `schema` subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    /// JSON schema for [`ChainConfig`].
    Chain,
    /// JSON schema for [`EngineConfig`].
    Config,
}

/// Return the JSON schema string for the given kind.
pub fn schema_json(kind: SchemaKind) -> Result<String> {
    let value = match kind {
        SchemaKind::Chain => serde_json::to_value(schema_for!(ChainConfig))?,
        SchemaKind::Config => serde_json::to_value(schema_for!(EngineConfig))?,
    };
    serde_json::to_string_pretty(&value).context("serialize schema")
}

/// Parse and validate a chain file, returning the chain's declared name on success.
pub fn validate_chain_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read chain file '{}'", path.display()))?;
    let chain: ChainConfig = serde_yaml::from_str(&content)
        .with_context(|| format!("parse chain YAML from '{}'", path.display()))?;
    if chain.steps.is_empty() {
        anyhow::bail!("chain '{}' declares no steps", chain.name);
    }
    Ok(chain.name)
}

/// Load, merge with an optional profile, apply env overrides and validate a config file,
/// returning the resolved config and any non-fatal warnings.
pub fn config_check(
    path: Option<&Path>,
    profile: Option<&str>,
) -> Result<(EngineConfig, Vec<String>)> {
    let mut config = fmf_config::load_config(path).context("load engine configuration")?;
    if let Some(profile) = profile {
        config = fmf_config::apply_profile(config, profile)
            .with_context(|| format!("apply profile '{profile}'"))?;
    }
    fmf_config::apply_env_overrides(&mut config);
    let warnings =
        fmf_config::validate_config(&config).context("validate engine configuration")?;
    Ok((config, warnings.into_iter().map(|w| w.to_string()).collect()))
}

/// Pretty-print a run manifest file (`run.yaml`) as JSON for inspection.
pub fn inspect_manifest_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest file '{}'", path.display()))?;
    let manifest: fmf_artefact::RunManifest = serde_yaml::from_str(&content)
        .with_context(|| format!("parse run manifest from '{}'", path.display()))?;
    serde_json::to_string_pretty(&manifest).context("serialize manifest")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn schema_json_chain_is_valid_json() {
        let text = schema_json(SchemaKind::Chain).unwrap();
        let _: serde_json::Value = serde_json::from_str(&text).unwrap();
    }

    #[test]
    fn schema_json_config_is_valid_json() {
        let text = schema_json(SchemaKind::Config).unwrap();
        let _: serde_json::Value = serde_json::from_str(&text).unwrap();
    }

    #[test]
    fn validate_chain_file_rejects_empty_steps() {
        let file = write_temp(
            r#"
name: empty-chain
inputs: {}
steps: []
"#,
        );
        let err = validate_chain_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("declares no steps"));
    }

    #[test]
    fn validate_chain_file_rejects_bad_yaml() {
        let file = write_temp("not: [valid");
        assert!(validate_chain_file(file.path()).is_err());
    }

    #[test]
    fn config_check_reports_no_providers_warning() {
        let file = write_temp("artefacts_dir: ./out\n");
        let (config, warnings) = config_check(Some(file.path()), None).unwrap();
        assert!(config.providers.is_empty());
        assert!(warnings.iter().any(|w| w.contains("provider")));
    }

    #[test]
    fn config_check_unknown_profile_errors() {
        let file = write_temp("artefacts_dir: ./out\n");
        let err = config_check(Some(file.path()), Some("nope")).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
