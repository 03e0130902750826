// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local-filesystem connector.

use crate::{Connector, Selector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fmf_core::{ResourceInfo, ResourceRef};
use fmf_error::FmfError;
use fmf_glob::IncludeExcludeGlobs;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Reads resources from a directory on the local filesystem.
pub struct LocalConnector {
    name: String,
    root: PathBuf,
}

impl LocalConnector {
    /// Construct a connector rooted at `root`.
    #[must_use]
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    fn resolve(&self, resource: &ResourceRef) -> PathBuf {
        self.root.join(&resource.id)
    }
}

fn file_uri(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[async_trait]
impl Connector for LocalConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<ResourceRef>, FmfError> {
        let rules = IncludeExcludeGlobs::new(&selector.include, &selector.exclude)
            .map_err(|e| FmfError::connector(format!("invalid selector: {e}")))?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                if !rules.decide_str(&rel).is_allowed() {
                    continue;
                }
                let name = entry
                    .file_name()
                    .to_string_lossy()
                    .into_owned();
                out.push(ResourceRef {
                    id: rel,
                    uri: file_uri(entry.path()),
                    name,
                });
            }
            out.sort_by(|a, b| a.id.cmp(&b.id));
            out
        })
        .await
        .map_err(|e| FmfError::connector(format!("local listing task panicked: {e}")))
    }

    async fn open(&self, resource: &ResourceRef) -> Result<Vec<u8>, FmfError> {
        let path = self.resolve(resource);
        tokio::fs::read(&path).await.map_err(|e| {
            FmfError::connector(format!("failed to read {}: {e}", path.display()))
                .with_context("path", path.display().to_string())
        })
    }

    async fn info(&self, resource: &ResourceRef) -> Result<ResourceInfo, FmfError> {
        let path = self.resolve(resource);
        let meta = tokio::fs::metadata(&path).await.map_err(|e| {
            FmfError::connector(format!("failed to stat {}: {e}", path.display()))
        })?;
        let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);
        let mut extra = BTreeMap::new();
        extra.insert("path".to_string(), serde_json::json!(path.display().to_string()));
        Ok(ResourceInfo {
            source_uri: resource.uri.clone(),
            modified_at,
            etag: None,
            size: Some(meta.len()),
            extra,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn lists_files_respecting_selector() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "hello");
        write(dir.path(), "sub/b.md", "world");
        write(dir.path(), "sub/ignore.tmp", "nope");

        let connector = LocalConnector::new("local", dir.path());
        let selector = Selector {
            include: vec!["**/*.txt".into(), "**/*.md".into()],
            exclude: vec![],
        };
        let mut refs = connector.list(&selector).await.unwrap();
        refs.sort_by(|a, b| a.id.cmp(&b.id));
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a.txt", "sub/b.md"]);
    }

    #[tokio::test]
    async fn opens_and_reads_file_content() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "hello world");
        let connector = LocalConnector::new("local", dir.path());
        let refs = connector.list(&Selector::all()).await.unwrap();
        let bytes = connector.open(&refs[0]).await.unwrap();
        assert_eq!(bytes, b"hello world");
    }

    #[tokio::test]
    async fn info_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "12345");
        let connector = LocalConnector::new("local", dir.path());
        let refs = connector.list(&Selector::all()).await.unwrap();
        let info = connector.info(&refs[0]).await.unwrap();
        assert_eq!(info.size, Some(5));
    }

    #[tokio::test]
    async fn open_missing_file_is_connector_error() {
        let dir = tempfile::tempdir().unwrap();
        let connector = LocalConnector::new("local", dir.path());
        let missing = ResourceRef {
            id: "missing.txt".into(),
            uri: "file:///missing.txt".into(),
            name: "missing.txt".into(),
        };
        let err = connector.open(&missing).await.unwrap_err();
        assert_eq!(err.kind, fmf_error::FmfErrorKind::Connector);
    }
}
