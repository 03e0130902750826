// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistence of a chain run's artefacts: per-document/chunk/output/row
//! JSONL files, RAG retrieval traces, the `run.yaml` manifest, and the
//! cross-run `index.json` with mtime-based retention.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use fmf_core::{Chunk, Document};
use fmf_error::FmfError;
use fmf_telemetry::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

fn io_err(action: &str, path: &Path, source: std::io::Error) -> FmfError {
    FmfError::export(format!("failed to {action} {}: {source}", path.display()))
}

/// Create `dir` and all parent components if they don't already exist.
pub fn ensure_dir(dir: &Path) -> Result<(), FmfError> {
    fs::create_dir_all(dir).map_err(|e| io_err("create directory", dir, e))
}

/// Write `records` to `path` as newline-delimited JSON, one object per line.
pub fn write_jsonl<T: Serialize>(path: &Path, records: impl IntoIterator<Item = T>) -> Result<(), FmfError> {
    let file = fs::File::create(path).map_err(|e| io_err("create", path, e))?;
    let mut writer = std::io::BufWriter::new(file);
    for record in records {
        let line = serde_json::to_string(&record)
            .map_err(|e| FmfError::export(format!("failed to serialize JSONL record for {}: {e}", path.display())))?;
        writer.write_all(line.as_bytes()).and_then(|()| writer.write_all(b"\n")).map_err(|e| io_err("write", path, e))?;
    }
    writer.flush().map_err(|e| io_err("flush", path, e))
}

/// Paths written by [`persist_documents_and_chunks`].
#[derive(Debug, Clone)]
pub struct DocumentArtefactPaths {
    /// Directory this run's artefacts live under (`{artefacts_dir}/{run_id}`).
    pub run_dir: PathBuf,
    /// Path to `docs.jsonl`.
    pub docs: PathBuf,
    /// Path to `chunks.jsonl`.
    pub chunks: PathBuf,
}

/// Persist loaded documents and derived chunks under `{artefacts_dir}/{run_id}/`.
pub fn persist_documents_and_chunks(
    artefacts_dir: &Path,
    run_id: &str,
    documents: &[Document],
    chunks: &[Chunk],
) -> Result<DocumentArtefactPaths, FmfError> {
    let run_dir = artefacts_dir.join(run_id);
    ensure_dir(&run_dir)?;
    let docs_path = run_dir.join("docs.jsonl");
    let chunks_path = run_dir.join("chunks.jsonl");
    write_jsonl(&docs_path, documents.iter())?;
    write_jsonl(&chunks_path, chunks.iter())?;
    Ok(DocumentArtefactPaths { run_dir, docs: docs_path, chunks: chunks_path })
}

/// A single record in `outputs.jsonl`: one row per item produced by the
/// chain's final step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    /// The run this output belongs to.
    pub run_id: String,
    /// Id of the step that produced it (the chain's last step).
    pub step_id: String,
    /// 0-based position among the final step's outputs.
    pub record_id: usize,
    /// The rendered output: plain text for steps that don't enforce JSON,
    /// a parsed object (or sentinel) for steps that do.
    pub output: serde_json::Value,
}

/// Write `outputs.jsonl` for the final step's outputs and return its path.
pub fn write_outputs_jsonl(run_dir: &Path, run_id: &str, step_id: &str, outputs: &[serde_json::Value]) -> Result<PathBuf, FmfError> {
    let path = run_dir.join("outputs.jsonl");
    let records = outputs.iter().enumerate().map(|(record_id, output)| OutputRecord {
        run_id: run_id.to_string(),
        step_id: step_id.to_string(),
        record_id,
        output: output.clone(),
    });
    write_jsonl(&path, records)?;
    Ok(path)
}

/// A single record in `rows.jsonl`, emitted only for `table_rows`/
/// `dataframe_rows` input modes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowRecord {
    /// Id of the document the row's table came from.
    pub doc_id: String,
    /// Source URI of the row's table.
    pub source_uri: String,
    /// 0-based row position within the table.
    pub row_index: usize,
    /// Column values, excluding internal bookkeeping keys.
    pub row: BTreeMap<String, serde_json::Value>,
}

/// Write `rows.jsonl` and return its path.
pub fn write_rows_jsonl(run_dir: &Path, rows: &[RowRecord]) -> Result<PathBuf, FmfError> {
    let path = run_dir.join("rows.jsonl");
    write_jsonl(&path, rows.iter())?;
    Ok(path)
}

/// Write one JSONL trace file per RAG pipeline under `{run_dir}/rag/`,
/// skipping pipelines with no recorded retrievals, and return the written
/// paths.
pub fn write_rag_traces(run_dir: &Path, traces: &BTreeMap<String, Vec<serde_json::Value>>) -> Result<Vec<PathBuf>, FmfError> {
    let mut paths = Vec::new();
    if traces.values().all(Vec::is_empty) {
        return Ok(paths);
    }
    let rag_dir = run_dir.join("rag");
    ensure_dir(&rag_dir)?;
    for (pipeline, entries) in traces {
        if entries.is_empty() {
            continue;
        }
        let path = rag_dir.join(format!("{pipeline}.jsonl"));
        write_jsonl(&path, entries.iter())?;
        paths.push(path);
    }
    Ok(paths)
}

/// Provider identity recorded in the run manifest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestProvider {
    /// Configured provider name (e.g. `"azure_openai"`, `"aws_bedrock"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// The `run.yaml` manifest summarizing a completed (or failed) chain run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// Unique run identifier.
    pub run_id: String,
    /// Named run profile, if one was selected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// The chain's resolved input configuration.
    pub inputs: serde_json::Value,
    /// Ids of prompts resolved and used during this run.
    pub prompts_used: Vec<String>,
    /// The inference provider used.
    pub provider: ManifestProvider,
    /// Final run-level metrics snapshot.
    pub metrics: MetricsSnapshot,
    /// Estimated dollar cost of this run's provider calls, if pricing was configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_estimate_usd: Option<f64>,
    /// Per-step telemetry (latency, retries, streaming fallbacks, ...).
    pub step_telemetry: serde_json::Value,
    /// Every artefact path produced by this run, in write order.
    pub artefacts: Vec<String>,
}

/// Serialize `manifest` as `run.yaml` under `run_dir` and return its path.
pub fn write_run_manifest(run_dir: &Path, manifest: &RunManifest) -> Result<PathBuf, FmfError> {
    let path = run_dir.join("run.yaml");
    let yaml = serde_yaml::to_string(manifest)
        .map_err(|e| FmfError::export(format!("failed to serialize run manifest: {e}")))?;
    fs::write(&path, yaml).map_err(|e| io_err("write", &path, e))?;
    Ok(path)
}

/// An entry in the cross-run `index.json` catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Run identifier.
    pub run_id: String,
    /// Absolute (or caller-relative) path to the run's artefact directory.
    pub run_dir: PathBuf,
    /// Absolute (or caller-relative) path to the run's `run.yaml`.
    pub run_yaml: PathBuf,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RunIndex {
    #[serde(default)]
    runs: Vec<IndexEntry>,
}

/// Append or replace `entry` in `{artefacts_dir}/index.json`, deduplicating
/// by `run_id` (a re-run of the same id replaces its prior entry in place
/// at the end of the list).
pub fn update_index(artefacts_dir: &Path, entry: IndexEntry) -> Result<(), FmfError> {
    ensure_dir(artefacts_dir)?;
    let index_path = artefacts_dir.join("index.json");
    let mut index = if index_path.exists() {
        let raw = fs::read_to_string(&index_path).map_err(|e| io_err("read", &index_path, e))?;
        serde_json::from_str(&raw).unwrap_or_default()
    } else {
        RunIndex::default()
    };
    index.runs.retain(|r| r.run_id != entry.run_id);
    index.runs.push(entry);
    let body = serde_json::to_string(&index)
        .map_err(|e| FmfError::export(format!("failed to serialize run index: {e}")))?;
    fs::write(&index_path, body).map_err(|e| io_err("write", &index_path, e))
}

/// Keep only the `retain_last` most-recently-modified run directories under
/// `artefacts_dir`, removing older ones. Directory order is determined by
/// mtime, not by name, matching the non-sequential nature of run ids.
/// A non-positive `retain_last` is a no-op.
pub fn apply_retention(artefacts_dir: &Path, retain_last: i64) -> Result<(), FmfError> {
    if retain_last <= 0 || !artefacts_dir.is_dir() {
        return Ok(());
    }
    let retain_last = retain_last as usize;

    let mut entries: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(artefacts_dir).map_err(|e| io_err("read", artefacts_dir, e))? {
        let entry = entry.map_err(|e| io_err("read entry in", artefacts_dir, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        entries.push((modified, path));
    }
    entries.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in entries.into_iter().skip(retain_last) {
        if let Err(e) = fs::remove_dir_all(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to prune retained run directory");
        }
    }
    Ok(())
}
