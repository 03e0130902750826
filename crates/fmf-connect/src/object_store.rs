// SPDX-License-Identifier: MIT OR Apache-2.0
//! S3-compatible object store connector.
//!
//! Speaks a minimal REST protocol against an S3-compatible endpoint: a
//! `GET {base_url}/{bucket}?prefix=...` listing call returning a JSON body
//! `{"keys": [...]}`, and per-object `GET`/`HEAD` calls at
//! `{base_url}/{bucket}/{key}`.

use crate::{Connector, Selector};
use async_trait::async_trait;
use fmf_core::{ResourceInfo, ResourceRef};
use fmf_error::FmfError;
use fmf_glob::IncludeExcludeGlobs;
use fmf_retry::{default_predicate, retry_async, RetryConfig};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct ListResponse {
    keys: Vec<String>,
}

/// Connects to an S3-compatible bucket over HTTPS.
pub struct ObjectStoreConnector {
    name: String,
    base_url: String,
    bucket: String,
    prefix: String,
    kms_required: bool,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl ObjectStoreConnector {
    /// Construct a connector for `bucket` at `base_url`, scoped under `prefix`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        kms_required: bool,
    ) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            name: name.into(),
            base_url: base_url.into(),
            bucket: bucket.into(),
            prefix,
            kms_required,
            client: reqwest::Client::new(),
            retry: RetryConfig::default(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), self.bucket, key)
    }

    fn resource_uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[async_trait]
impl Connector for ObjectStoreConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, selector: &Selector) -> Result<Vec<ResourceRef>, FmfError> {
        let rules = IncludeExcludeGlobs::new(&selector.include, &selector.exclude)
            .map_err(|e| FmfError::connector(format!("invalid selector: {e}")))?;
        let url = format!(
            "{}/{}?prefix={}",
            self.base_url.trim_end_matches('/'),
            self.bucket,
            self.prefix
        );
        let outcome = retry_async(&self.retry, default_predicate, || {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let resp = client.get(&url).send().await.map_err(|e| {
                    FmfError::connector(format!("listing request failed: {e}"))
                })?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FmfError::connector(format!("listing returned {status}"))
                        .with_context("status_code", status.as_u16()));
                }
                resp.json::<ListResponse>()
                    .await
                    .map_err(|e| FmfError::connector(format!("listing body invalid: {e}")))
            }
        })
        .await
        .map_err(|e| e)?;

        let mut out = Vec::new();
        for key in outcome.value.keys {
            let rel = key.strip_prefix(&self.prefix).unwrap_or(&key);
            if !rules.decide_str(rel).is_allowed() {
                continue;
            }
            let name = rel.rsplit('/').next().unwrap_or(rel).to_string();
            out.push(ResourceRef {
                id: key.clone(),
                uri: self.resource_uri(&key),
                name,
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn open(&self, resource: &ResourceRef) -> Result<Vec<u8>, FmfError> {
        let url = self.object_url(&resource.id);
        let outcome = retry_async(&self.retry, default_predicate, || {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let resp = client.get(&url).send().await.map_err(|e| {
                    FmfError::connector(format!("object fetch failed: {e}"))
                })?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FmfError::connector(format!("object fetch returned {status}"))
                        .with_context("status_code", status.as_u16()));
                }
                resp.bytes()
                    .await
                    .map(|b| b.to_vec())
                    .map_err(|e| FmfError::connector(format!("object body read failed: {e}")))
            }
        })
        .await?;
        Ok(outcome.value)
    }

    async fn info(&self, resource: &ResourceRef) -> Result<ResourceInfo, FmfError> {
        let url = self.object_url(&resource.id);
        let outcome = retry_async(&self.retry, default_predicate, || {
            let client = self.client.clone();
            let url = url.clone();
            async move {
                let resp = client.head(&url).send().await.map_err(|e| {
                    FmfError::connector(format!("head request failed: {e}"))
                })?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(FmfError::connector(format!("head returned {status}"))
                        .with_context("status_code", status.as_u16()));
                }
                Ok(resp.headers().clone())
            }
        })
        .await?;
        let headers = outcome.value;

        if self.kms_required {
            let sse = headers
                .get("x-amz-server-side-encryption")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if sse != "aws:kms" {
                return Err(FmfError::connector(
                    "KMS encryption required but object not encrypted with KMS",
                ));
            }
        }

        let size = headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let etag = headers
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ResourceInfo {
            source_uri: resource.uri.clone(),
            modified_at: None,
            etag,
            size,
            extra: BTreeMap::new(),
        })
    }
}
