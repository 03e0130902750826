// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable process exit codes.
//!
//! Every error raised by the framework is one of the [`FmfErrorKind`]
//! variants, each carrying a stable [`exit_code`](FmfErrorKind::exit_code)
//! so that CLI invocations and batch schedulers can distinguish failure
//! classes without parsing messages.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Broad failure family. Mirrors the framework's exit-code contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FmfErrorKind {
    /// Malformed or missing configuration.
    Config,
    /// Credential resolution or provider authentication failure.
    Auth,
    /// Connector listing/read/write failure (local fs, object store, SharePoint-like drives).
    Connector,
    /// Document loading, chunking, or row-extraction failure.
    Processing,
    /// Provider call failed after exhausting retries, or the response could not be parsed.
    Inference,
    /// The provider rejected the request outright (bad request, unsupported capability).
    Provider,
    /// Artefact or manifest write failure.
    Export,
}

impl FmfErrorKind {
    /// Process exit code associated with this error kind.
    ///
    /// `0` is reserved for success and is never returned by an error kind.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Config => 1,
            Self::Auth => 2,
            Self::Connector => 3,
            Self::Processing => 4,
            Self::Inference => 5,
            Self::Provider => 6,
            Self::Export => 7,
        }
    }

    /// Lowercase, stable string form used in structured log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config_error",
            Self::Auth => "auth_error",
            Self::Connector => "connector_error",
            Self::Processing => "processing_error",
            Self::Inference => "inference_error",
            Self::Provider => "provider_error",
            Self::Export => "export_error",
        }
    }
}

impl fmt::Display for FmfErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A framework error: a [`FmfErrorKind`], a human-readable message, optional
/// structured context, and an optional upstream cause.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct FmfError {
    /// The failure family, used to derive the process exit code.
    pub kind: FmfErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Structured key-value context (e.g. `source_uri`, `step_id`, `status_code`).
    pub context: BTreeMap<String, serde_json::Value>,
    /// The underlying cause, if this error wraps another.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FmfError {
    /// Construct a new error of the given kind.
    #[must_use]
    pub fn new(kind: FmfErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
            source: None,
        }
    }

    /// Shorthand constructors, one per kind.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Config, message)
    }

    /// See [`FmfError::config`].
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Auth, message)
    }

    /// See [`FmfError::config`].
    #[must_use]
    pub fn connector(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Connector, message)
    }

    /// See [`FmfError::config`].
    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Processing, message)
    }

    /// See [`FmfError::config`].
    #[must_use]
    pub fn inference(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Inference, message)
    }

    /// See [`FmfError::config`].
    #[must_use]
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Provider, message)
    }

    /// See [`FmfError::config`].
    #[must_use]
    pub fn export(message: impl Into<String>) -> Self {
        Self::new(FmfErrorKind::Export, message)
    }

    /// Attach a context key-value pair, returning `self` for chaining.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach an upstream cause, returning `self` for chaining.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// The process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.kind.exit_code()
    }
}

/// Serializable projection of [`FmfError`], used for JSON-line error logs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FmfErrorDto {
    /// See [`FmfError::kind`].
    pub kind: FmfErrorKind,
    /// See [`FmfError::message`].
    pub message: String,
    /// See [`FmfError::context`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, serde_json::Value>,
    /// String rendering of the upstream cause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&FmfError> for FmfErrorDto {
    fn from(err: &FmfError) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

/// Convenience alias used throughout the framework's crates.
pub type Result<T> = std::result::Result<T, FmfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable_and_distinct() {
        let kinds = [
            FmfErrorKind::Config,
            FmfErrorKind::Auth,
            FmfErrorKind::Connector,
            FmfErrorKind::Processing,
            FmfErrorKind::Inference,
            FmfErrorKind::Provider,
            FmfErrorKind::Export,
        ];
        let codes: Vec<i32> = kinds.iter().map(|k| k.exit_code()).collect();
        let mut sorted = codes.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len(), "exit codes must be distinct");
        assert_eq!(codes, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn builder_attaches_context_and_source() {
        let cause = std::io::Error::other("boom");
        let err = FmfError::connector("could not list objects")
            .with_context("bucket", "my-bucket")
            .with_source(cause);
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.context["bucket"], "my-bucket");
        assert!(err.source.is_some());
    }

    #[test]
    fn dto_round_trips_through_json() {
        let err = FmfError::inference("provider timed out").with_context("retries", 3);
        let dto = FmfErrorDto::from(&err);
        let json = serde_json::to_string(&dto).unwrap();
        let back: FmfErrorDto = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, FmfErrorKind::Inference);
        assert_eq!(back.context["retries"], 3);
    }
}
