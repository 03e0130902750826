// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connectors: uniform read access to batch inputs regardless of where
//! they live (local disk, an S3-compatible object store, a SharePoint-like
//! document drive).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod local;
mod object_store;

pub use local::LocalConnector;
pub use object_store::ObjectStoreConnector;

use async_trait::async_trait;
use fmf_core::{ResourceInfo, ResourceRef};
use fmf_error::FmfError;

/// Include/exclude glob patterns scoping a [`Connector::list`] call.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    /// Patterns a resource's relative path must match at least one of.
    pub include: Vec<String>,
    /// Patterns that exclude a resource even if it matched an include pattern.
    pub exclude: Vec<String>,
}

impl Selector {
    /// Construct a selector with no patterns (matches everything).
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }
}

/// Uniform access to a source of readable resources.
///
/// Implementations are responsible for their own retry policy on
/// transient failures (see `fmf-retry`); callers only see terminal
/// [`FmfError`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The connector's configured name, used to resolve it from chain/RAG config.
    fn name(&self) -> &str;

    /// List resources matching `selector`.
    async fn list(&self, selector: &Selector) -> Result<Vec<ResourceRef>, FmfError>;

    /// Read a resource's full content into memory.
    async fn open(&self, resource: &ResourceRef) -> Result<Vec<u8>, FmfError>;

    /// Fetch provenance metadata for a resource without reading its content.
    async fn info(&self, resource: &ResourceRef) -> Result<ResourceInfo, FmfError>;
}
