// SPDX-License-Identifier: MIT OR Apache-2.0
//! Versioned, content-hashed prompt template registry backed by YAML files
//! on disk, with an append-only index recording every version ever seen.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fmf_error::FmfError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A single resolved prompt version, ready for interpolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptVersion {
    /// Prompt id (the YAML file's logical name, or `"inline"`).
    pub id: String,
    /// Version label.
    pub version: String,
    /// The raw template text, containing `{{ name }}` placeholders.
    pub template: String,
    /// SHA-256 hex digest of `template`.
    pub content_hash: String,
}

#[derive(Debug, Deserialize)]
struct PromptTestCase {
    #[serde(default)]
    vars: BTreeMap<String, String>,
    assertions: PromptAssertions,
}

#[derive(Debug, Deserialize)]
struct PromptAssertions {
    #[serde(default)]
    contains: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SingleVersionFile {
    template: String,
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    tests: Vec<PromptTestCase>,
}

fn default_version() -> String {
    "v0".to_string()
}

#[derive(Debug, Deserialize)]
struct VersionEntry {
    version: String,
    template: String,
    #[serde(default)]
    tests: Vec<PromptTestCase>,
}

#[derive(Debug, Deserialize)]
struct MultiVersionFile {
    versions: Vec<VersionEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    prompts: BTreeMap<String, BTreeMap<String, String>>,
}

/// Render `{{ name }}` placeholders with values from `vars`, leaving
/// unknown placeholders untouched.
#[must_use]
pub fn render_simple(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        out = out.replace(&format!("{{{{ {k} }}}}"), v);
        out = out.replace(&format!("{{{{{k}}}}}"), v);
    }
    out
}

fn compute_hash(template: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn run_inline_tests(id: &str, version: &str, template: &str, tests: &[PromptTestCase]) -> Result<(), FmfError> {
    for (i, test) in tests.iter().enumerate() {
        let rendered = render_simple(template, &test.vars);
        for expected in &test.assertions.contains {
            if !rendered.contains(expected.as_str()) {
                return Err(FmfError::config(format!(
                    "prompt {id}#{version} failed inline test {i}: rendered output does not contain {expected:?}"
                )));
            }
        }
    }
    Ok(())
}

/// A filesystem-backed prompt registry: YAML files under `root`, indexed
/// by an `index.yaml` recording every id/version/content-hash triple.
pub struct PromptRegistry {
    root: PathBuf,
    index_path: PathBuf,
    index: Mutex<IndexFile>,
}

impl PromptRegistry {
    /// Open a registry rooted at `root`, with its index at `index_file`
    /// (relative to `root`). Creates an empty index if none exists yet.
    pub fn open(root: impl Into<PathBuf>, index_file: impl AsRef<Path>) -> Result<Self, FmfError> {
        let root = root.into();
        let index_path = root.join(index_file);
        let index = if index_path.exists() {
            let raw = fs::read_to_string(&index_path)
                .map_err(|e| FmfError::config(format!("failed to read prompt index: {e}")))?;
            serde_yaml::from_str(&raw).map_err(|e| FmfError::config(format!("invalid prompt index: {e}")))?
        } else {
            IndexFile::default()
        };
        Ok(Self {
            root,
            index_path,
            index: Mutex::new(index),
        })
    }

    fn persist_index(&self) -> Result<(), FmfError> {
        let index = self.index.lock().expect("prompt index mutex poisoned");
        let yaml = serde_yaml::to_string(&*index)
            .map_err(|e| FmfError::config(format!("failed to serialize prompt index: {e}")))?;
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent).map_err(|e| FmfError::config(format!("failed to create prompt dir: {e}")))?;
        }
        fs::write(&self.index_path, yaml).map_err(|e| FmfError::config(format!("failed to write prompt index: {e}")))
    }

    /// Register a prompt reference of the form `"path"` or `"path#version"`,
    /// loading its YAML file, running any inline tests, and upserting the
    /// index. Returns the resolved [`PromptVersion`].
    pub fn register(&self, reference: &str) -> Result<PromptVersion, FmfError> {
        let (rel_path, requested_version) = match reference.split_once('#') {
            Some((p, v)) => (p, Some(v.to_string())),
            None => (reference, None),
        };
        let full_path = self.root.join(rel_path);
        let raw = fs::read_to_string(&full_path)
            .map_err(|e| FmfError::config(format!("failed to read prompt {rel_path}: {e}")))?;
        let id = rel_path.to_string();

        let (version, template, tests) = if let Ok(multi) = serde_yaml::from_str::<MultiVersionFile>(&raw) {
            let requested = requested_version.clone().ok_or_else(|| {
                FmfError::config(format!("prompt {id} declares multiple versions; a version must be specified"))
            })?;
            let entry = multi
                .versions
                .into_iter()
                .find(|v| v.version == requested)
                .ok_or_else(|| FmfError::config(format!("prompt {id} has no version {requested}")))?;
            (entry.version, entry.template, entry.tests)
        } else {
            let single: SingleVersionFile = serde_yaml::from_str(&raw)
                .map_err(|e| FmfError::config(format!("invalid prompt file {rel_path}: {e}")))?;
            if let Some(req) = &requested_version {
                if *req != single.version {
                    return Err(FmfError::config(format!(
                        "prompt {id} is version {} but {req} was requested",
                        single.version
                    )));
                }
            }
            (single.version, single.template, single.tests)
        };

        run_inline_tests(&id, &version, &template, &tests)?;
        let content_hash = compute_hash(&template);

        {
            let mut index = self.index.lock().expect("prompt index mutex poisoned");
            index
                .prompts
                .entry(id.clone())
                .or_default()
                .insert(version.clone(), content_hash.clone());
        }
        self.persist_index()?;

        Ok(PromptVersion { id, version, template, content_hash })
    }

    /// Resolve a previously-registered `"id#version"` (or bare `"id"` if
    /// it has exactly one registered version) by re-reading its source file.
    pub fn get(&self, id_version: &str) -> Result<PromptVersion, FmfError> {
        let (id, version) = match id_version.split_once('#') {
            Some((i, v)) => (i.to_string(), v.to_string()),
            None => {
                let index = self.index.lock().expect("prompt index mutex poisoned");
                let versions = index
                    .prompts
                    .get(id_version)
                    .ok_or_else(|| FmfError::config(format!("prompt {id_version} is not registered")))?;
                if versions.len() != 1 {
                    return Err(FmfError::config(format!(
                        "prompt {id_version} has {} versions; a version must be specified",
                        versions.len()
                    )));
                }
                (id_version.to_string(), versions.keys().next().unwrap().clone())
            }
        };
        self.register(&format!("{id}#{version}"))
    }

    /// Build a [`PromptVersion`] for an inline template given via chain
    /// config (`"inline:..."` references), without touching the registry.
    #[must_use]
    pub fn inline(template: &str) -> PromptVersion {
        PromptVersion {
            id: "inline".to_string(),
            version: "v0".to_string(),
            content_hash: compute_hash(template),
            template: template.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn registers_single_version_prompt() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "summarize.yaml", "template: 'Summarize: {{ text }}'\nversion: v1\n");
        let registry = PromptRegistry::open(dir.path(), "prompts/index.yaml").unwrap();
        let pv = registry.register("summarize.yaml").unwrap();
        assert_eq!(pv.version, "v1");
        assert!(pv.template.contains("Summarize"));
    }

    #[test]
    fn registers_multi_version_prompt_requires_version() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "classify.yaml",
            "versions:\n  - version: v1\n    template: 'v1 template'\n  - version: v2\n    template: 'v2 template'\n",
        );
        let registry = PromptRegistry::open(dir.path(), "prompts/index.yaml").unwrap();
        let err = registry.register("classify.yaml").unwrap_err();
        assert_eq!(err.kind, fmf_error::FmfErrorKind::Config);

        let pv = registry.register("classify.yaml#v2").unwrap();
        assert_eq!(pv.template, "v2 template");
    }

    #[test]
    fn inline_test_failure_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "bad.yaml",
            "template: 'Hello {{ name }}'\nversion: v1\ntests:\n  - vars:\n      name: World\n    assertions:\n      contains:\n        - 'Goodbye'\n",
        );
        let registry = PromptRegistry::open(dir.path(), "prompts/index.yaml").unwrap();
        let err = registry.register("bad.yaml").unwrap_err();
        assert!(err.message.contains("failed inline test"));
    }

    #[test]
    fn inline_test_success_passes() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "good.yaml",
            "template: 'Hello {{ name }}'\nversion: v1\ntests:\n  - vars:\n      name: World\n    assertions:\n      contains:\n        - 'Hello World'\n",
        );
        let registry = PromptRegistry::open(dir.path(), "prompts/index.yaml").unwrap();
        let pv = registry.register("good.yaml").unwrap();
        assert_eq!(pv.version, "v1");
    }

    #[test]
    fn get_resolves_single_registered_version() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "greet.yaml", "template: 'Hi'\nversion: v1\n");
        let registry = PromptRegistry::open(dir.path(), "prompts/index.yaml").unwrap();
        registry.register("greet.yaml").unwrap();
        let pv = registry.get("greet.yaml").unwrap();
        assert_eq!(pv.version, "v1");
    }

    #[test]
    fn inline_helper_computes_hash_without_registry() {
        let pv = PromptRegistry::inline("Summarize: {{ text }}");
        assert_eq!(pv.id, "inline");
        assert_eq!(pv.content_hash.len(), 64);
    }

    #[test]
    fn content_hash_is_stable_for_identical_templates() {
        let a = PromptRegistry::inline("same template");
        let b = PromptRegistry::inline("same template");
        assert_eq!(a.content_hash, b.content_hash);
    }
}
