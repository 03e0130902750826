// SPDX-License-Identifier: MIT OR Apache-2.0
//! Chain executor: resolves a declarative chain file against its inputs,
//! runs each step's prompt over every unit with bounded concurrency, and
//! writes the resulting artefacts and run manifest.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod interp;
pub mod units;

pub use config::{ChainConfig, ExportFormat, InputMode, OutputSpec, StepConfig, StepMode};
pub use interp::JoinLimits;
pub use units::{collect_inputs, InputCollections, InputUnit};

use fmf_connect::Connector;
use fmf_core::ir::{IrContentBlock, IrConversation, IrMessage, IrRole};
use fmf_core::{data_url, Chunk, Document};
use fmf_error::FmfError;
use fmf_json::{enforce_json, EnforcedJson};
use fmf_prompt::{PromptRegistry, PromptVersion};
use fmf_rag::{build_rag_pipeline, RagPipeline, RagPipelineConfig};
use fmf_retry::RetryConfig;
use fmf_runtime::{invoke_with_mode, Completion, CompletionParams, InferenceMode, InferenceProvider, InferenceTelemetry};
use fmf_telemetry::Metrics;
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

/// Where a named RAG pipeline reads its corpus from: a configured
/// connector plus the selection/chunking/modality settings that shape
/// its index. Built lazily, once per run, the first time a step
/// references it.
#[derive(Debug, Clone)]
pub struct RagPipelineSource {
    /// Name of the connector (from [`ChainEngine::connectors`]) to read from.
    pub connector: String,
    /// Indexing configuration passed to [`fmf_rag::build_rag_pipeline`].
    pub config: RagPipelineConfig,
}

/// Per-1,000-token pricing used to estimate a run's dollar cost.
#[derive(Debug, Clone, Copy)]
pub struct CostRates {
    /// Dollars per 1,000 prompt tokens.
    pub prompt_per_1k: f64,
    /// Dollars per 1,000 completion tokens.
    pub completion_per_1k: f64,
}

/// Everything the chain executor needs that isn't named in the chain file
/// itself: configured connectors, the single active inference provider,
/// the prompt registry, and any RAG pipeline sources steps may reference.
pub struct ChainEngine {
    /// Connectors available to `inputs.connector` and RAG pipeline sources.
    pub connectors: BTreeMap<String, Arc<dyn Connector>>,
    /// The inference provider this run invokes.
    pub provider: Arc<dyn InferenceProvider>,
    /// The provider's configured name, recorded in the run manifest.
    pub provider_name: String,
    /// Versioned prompt templates.
    pub prompt_registry: Arc<PromptRegistry>,
    /// RAG pipeline sources, keyed by the name steps reference in `rag.pipeline`.
    pub rag_sources: BTreeMap<String, RagPipelineSource>,
    /// Retry policy applied to every provider call.
    pub retry_config: RetryConfig,
    /// Aggregation caps applied when rendering list-valued expressions.
    pub join_limits: JoinLimits,
    /// Optional per-1k token pricing for the manifest's cost estimate.
    pub cost_rates: Option<CostRates>,
    /// Shared run-level metrics, snapshotted into the manifest at the end.
    pub metrics: Arc<Metrics>,
    /// Number of most-recent run directories to keep under `artefacts_dir`
    /// after this run completes. `None` or non-positive disables pruning.
    pub retain_last: Option<i64>,
}

/// The outcome of running a full chain to completion: the manifest plus
/// every artefact path written, ready to hand to a caller for reporting.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The written run manifest.
    pub manifest: fmf_artefact::RunManifest,
    /// Absolute paths to every artefact written for this run.
    pub artefact_paths: Vec<std::path::PathBuf>,
}

struct StepOutcome {
    output_name: String,
    outputs: Vec<Value>,
    prompt: PromptVersion,
    telemetry: Vec<InferenceTelemetry>,
    failed_units: usize,
}

fn summarize_telemetry(telemetry: &[InferenceTelemetry]) -> Value {
    if telemetry.is_empty() {
        return serde_json::json!({});
    }
    let total_retries: u64 = telemetry.iter().map(|t| t.retries).sum();
    let total_latency_ms: u64 = telemetry.iter().map(|t| t.latency_ms).sum();
    let streamed = telemetry.iter().filter(|t| t.streaming).count();
    let fell_back = telemetry.iter().filter(|t| t.fallback_reason.is_some()).count();
    serde_json::json!({
        "calls": telemetry.len(),
        "total_retries": total_retries,
        "avg_latency_ms": total_latency_ms / telemetry.len() as u64,
        "streamed": streamed,
        "streaming_fallbacks": fell_back,
    })
}

fn resolve_inference_mode(step: &config::InferConfig) -> Result<InferenceMode, FmfError> {
    if let Ok(env_override) = std::env::var("FMF_INFER_MODE") {
        return fmf_runtime::normalize_mode(Some(env_override.as_str()));
    }
    fmf_runtime::normalize_mode(step.mode.as_deref())
}

impl ChainEngine {
    /// Resolve `prompt_ref` (`"inline: ..."`, `"path#version"`, or
    /// `"id#version"`) into a [`PromptVersion`].
    fn resolve_prompt(&self, prompt_ref: &str) -> Result<PromptVersion, FmfError> {
        if let Some(inline) = prompt_ref.strip_prefix("inline:") {
            return Ok(PromptRegistry::inline(inline.trim()));
        }
        self.prompt_registry.get(prompt_ref)
    }

    async fn rag_pipeline(&self, name: &str, cache: &Mutex<BTreeMap<String, Arc<RagPipeline>>>) -> Result<Arc<RagPipeline>, FmfError> {
        {
            let guard = cache.lock().await;
            if let Some(pipeline) = guard.get(name) {
                return Ok(Arc::clone(pipeline));
            }
        }
        let source = self.rag_sources.get(name).ok_or_else(|| FmfError::config(format!("rag pipeline {name:?} is not configured")))?;
        let connector = self
            .connectors
            .get(&source.connector)
            .ok_or_else(|| FmfError::config(format!("rag pipeline {name:?} references unknown connector {:?}", source.connector)))?;
        let pipeline = Arc::new(build_rag_pipeline(&source.config, Arc::clone(connector)).await?);
        cache.lock().await.insert(name.to_string(), Arc::clone(&pipeline));
        Ok(pipeline)
    }

    fn default_params(step: &StepConfig) -> CompletionParams {
        CompletionParams { temperature: step.params.temperature, max_tokens: step.params.max_tokens }
    }

    /// Build the user message for a unit: a single text block, or (for
    /// `mode: multimodal` steps) a text block followed by one image part
    /// per retained blob on the unit and per retrieved RAG image.
    fn build_conversation(body: String, mode: StepMode, unit: &InputUnit, rag_image_urls: &[String]) -> IrConversation {
        if mode != StepMode::Multimodal {
            return IrConversation::new().push(IrMessage::text(IrRole::User, body));
        }
        let mut blocks = vec![IrContentBlock::Text { text: body }];
        for blob in unit.blobs() {
            let url = data_url(blob);
            if let Some((media_type, data)) = split_data_url(&url) {
                blocks.push(IrContentBlock::Image { media_type, data });
            }
        }
        for url in rag_image_urls {
            if let Some((media_type, data)) = split_data_url(url) {
                blocks.push(IrContentBlock::Image { media_type, data });
            }
        }
        IrConversation::new().push(IrMessage::new(IrRole::User, blocks))
    }

    async fn execute_unit(
        &self,
        step: &StepConfig,
        unit: &InputUnit,
        all: &BTreeMap<String, Vec<Value>>,
        documents: &BTreeMap<String, Document>,
        rag_cache: &Mutex<BTreeMap<String, Arc<RagPipeline>>>,
    ) -> Result<(Value, InferenceTelemetry), FmfError> {
        let context = unit.context(all, documents);
        let prompt = self.resolve_prompt(&step.prompt)?;
        let mut vars = interp::resolve_inputs(&step.inputs, &context, self.join_limits)?;

        let mut rag_image_urls = Vec::new();
        let mut rag_block = String::new();
        let mut inject_rag_block = false;
        if let Some(rag) = &step.rag {
            let pipeline = self.rag_pipeline(&rag.pipeline, rag_cache).await?;
            let query = match &rag.query {
                Some(expr) => interp::eval_input_value(expr, &context, self.join_limits)?,
                None => unit.default_text(),
            };
            let result = pipeline.retrieve(&query, rag.top_k_text, rag.top_k_images);
            rag_block = RagPipeline::format_text_block(&result.texts);
            rag_image_urls = RagPipeline::image_data_urls(&result.images);
            vars.insert(rag.text_var.clone(), rag_block.clone());
            vars.insert(rag.image_var.clone(), rag_image_urls.join("\n"));
            inject_rag_block = rag.inject_prompt && !result.texts.is_empty();
        }

        let mut body = interp::render_template(&prompt.template, &vars);
        if inject_rag_block {
            body.push_str("\n\nRetrieved context:\n");
            body.push_str(&rag_block);
        }
        if step.mode != StepMode::Multimodal && !rag_image_urls.is_empty() {
            for (idx, url) in rag_image_urls.iter().enumerate() {
                body.push_str(&format!("\n[image {}] {}", idx + 1, url));
            }
        }

        let conversation = Self::build_conversation(body, step.mode, unit, &rag_image_urls);
        let params = Self::default_params(step);
        let mode = resolve_inference_mode(&step.infer)?;

        let (completion, telemetry) =
            invoke_with_mode(self.provider.as_ref(), &conversation, &params, mode, &self.retry_config, &self.metrics).await?;

        let value = if step.output.expects_json() {
            enforce_json(&completion.text, step.output.parse_retries(), step.output.schema(), &step.id, &self.metrics).into_value()
        } else {
            Value::String(completion.text)
        };
        Ok((value, telemetry))
    }

    async fn execute_step(
        &self,
        step: &StepConfig,
        units: &[InputUnit],
        all: &BTreeMap<String, Vec<Value>>,
        documents: &BTreeMap<String, Document>,
        concurrency: usize,
        continue_on_error: bool,
        rag_cache: &Mutex<BTreeMap<String, Arc<RagPipeline>>>,
    ) -> Result<StepOutcome, FmfError> {
        let prompt = self.resolve_prompt(&step.prompt)?;
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let failed_units = Arc::new(AtomicUsize::new(0));

        let mut in_flight = FuturesUnordered::new();
        let mut outputs = Vec::with_capacity(units.len());
        let mut telemetry = Vec::with_capacity(units.len());

        for unit in units {
            let semaphore = Arc::clone(&semaphore);
            let failed_units = Arc::clone(&failed_units);
            in_flight.push(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let result = self.execute_unit(step, unit, all, documents, rag_cache).await;
                match result {
                    Ok((value, telemetry)) => Ok(Some((value, telemetry))),
                    Err(err) if continue_on_error => {
                        warn!(step = %step.id, unit = unit.id(), error = %err, "unit failed, continuing");
                        failed_units.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            });
        }

        while let Some(result) = in_flight.next().await {
            if let Some((value, unit_telemetry)) = result? {
                outputs.push(value);
                telemetry.push(unit_telemetry);
            }
        }

        self.metrics.record_step_executed();
        Ok(StepOutcome {
            output_name: step.output.name().to_string(),
            outputs,
            prompt,
            telemetry,
            failed_units: failed_units.load(Ordering::SeqCst),
        })
    }

    /// Run every step of `chain` sequentially (each step's units execute
    /// concurrently, bounded by `chain.concurrency`), then persist all
    /// artefacts and the run manifest under `artefacts_dir`.
    pub async fn run(
        &self,
        chain: &ChainConfig,
        artefacts_dir: &std::path::Path,
        profile: Option<String>,
        run_id: Option<String>,
    ) -> Result<RunOutcome, FmfError> {
        let run_id = run_id.unwrap_or_else(generate_run_id);
        info!(chain = %chain.name, run_id = %run_id, "starting chain run");

        let connector = match &chain.inputs.connector {
            Some(name) => Some(
                self.connectors
                    .get(name)
                    .ok_or_else(|| FmfError::config(format!("unknown connector {name:?}")))?
                    .clone(),
            ),
            None => None,
        };
        let collected = collect_inputs(&chain.inputs, connector).await?;
        let documents = units::document_lookup(&collected.documents);
        for _ in &collected.documents {
            self.metrics.record_document_loaded();
        }
        let chunk_count = collected.units.iter().filter(|u| matches!(u, InputUnit::Chunk(_))).count();
        if chunk_count > 0 {
            self.metrics.record_chunks_produced(chunk_count as u64);
        }
        for unit in &collected.units {
            match unit {
                InputUnit::Row(_) => self.metrics.record_row_processed(),
                InputUnit::Group(_) => self.metrics.record_image_group_processed(),
                InputUnit::Chunk(_) => {}
            }
        }

        let rag_cache: Mutex<BTreeMap<String, Arc<RagPipeline>>> = Mutex::new(BTreeMap::new());
        let mut all: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let mut prompts_used = Vec::new();
        let mut step_telemetry = serde_json::Map::new();
        let mut last_outcome: Option<StepOutcome> = None;

        for step in &chain.steps {
            let outcome = self
                .execute_step(step, &collected.units, &all, &documents, chain.concurrency, chain.continue_on_error, &rag_cache)
                .await?;
            prompts_used.push(format!("{}@{}#{}", outcome.prompt.id, outcome.prompt.version, outcome.prompt.content_hash));
            let mut entry = summarize_telemetry(&outcome.telemetry);
            if let Value::Object(map) = &mut entry {
                map.insert("units".to_string(), serde_json::json!(collected.units.len()));
                map.insert("failed_units".to_string(), serde_json::json!(outcome.failed_units));
            }
            step_telemetry.insert(step.id.clone(), entry);
            all.insert(outcome.output_name.clone(), outcome.outputs.clone());
            last_outcome = Some(outcome);
        }

        let final_outcome = last_outcome.ok_or_else(|| FmfError::config("chain has no steps"))?;

        let mut artefact_paths = Vec::new();
        let chunks: Vec<Chunk> = collected.units.iter().filter_map(|u| match u { InputUnit::Chunk(c) => Some(c.clone()), _ => None }).collect();
        let doc_paths = fmf_artefact::persist_documents_and_chunks(artefacts_dir, &run_id, &collected.documents, &chunks)?;
        artefact_paths.push(doc_paths.docs.clone());
        artefact_paths.push(doc_paths.chunks.clone());

        let outputs_path =
            fmf_artefact::write_outputs_jsonl(&doc_paths.run_dir, &run_id, &chain.steps.last().expect("checked above").id, &final_outcome.outputs)?;
        artefact_paths.push(outputs_path);

        if matches!(chain.inputs.mode, Some(InputMode::TableRows) | Some(InputMode::DataframeRows)) {
            let rows: Vec<fmf_artefact::RowRecord> = collected
                .units
                .iter()
                .filter_map(|u| match u {
                    InputUnit::Row(r) => Some(fmf_artefact::RowRecord {
                        doc_id: r.doc_id.clone().unwrap_or_default(),
                        source_uri: r.source_uri.clone(),
                        row_index: r.index,
                        row: r.values.clone(),
                    }),
                    _ => None,
                })
                .collect();
            if !rows.is_empty() {
                artefact_paths.push(fmf_artefact::write_rows_jsonl(&doc_paths.run_dir, &rows)?);
            }
        }

        for export in &chain.outputs {
            if let Some(path) = self.write_declared_output(export, &run_id, &all)? {
                artefact_paths.push(path);
            }
        }

        let mut rag_traces = BTreeMap::new();
        {
            let guard = rag_cache.lock().await;
            for (name, pipeline) in guard.iter() {
                rag_traces.insert(name.clone(), pipeline.history());
            }
        }
        artefact_paths.extend(fmf_artefact::write_rag_traces(&doc_paths.run_dir, &rag_traces)?);

        let metrics_snapshot = self.metrics.snapshot();
        let cost_estimate_usd = self.cost_rates.map(|rates| {
            (metrics_snapshot.tokens_prompt as f64 / 1000.0) * rates.prompt_per_1k
                + (metrics_snapshot.tokens_completion as f64 / 1000.0) * rates.completion_per_1k
        });

        let manifest = fmf_artefact::RunManifest {
            run_id: run_id.clone(),
            profile,
            inputs: serde_json::to_value(chain_inputs_summary(chain)).unwrap_or(Value::Null),
            prompts_used,
            provider: fmf_artefact::ManifestProvider { name: Some(self.provider_name.clone()) },
            metrics: metrics_snapshot,
            cost_estimate_usd,
            step_telemetry: Value::Object(step_telemetry),
            artefacts: artefact_paths.iter().map(|p| p.display().to_string()).collect(),
        };
        let manifest_path = fmf_artefact::write_run_manifest(&doc_paths.run_dir, &manifest)?;
        artefact_paths.push(manifest_path.clone());

        fmf_artefact::update_index(artefacts_dir, fmf_artefact::IndexEntry { run_id: run_id.clone(), run_dir: doc_paths.run_dir.clone(), run_yaml: manifest_path })?;

        if let Some(retain_last) = self.retain_last {
            fmf_artefact::apply_retention(artefacts_dir, retain_last)?;
        }

        Ok(RunOutcome { manifest, artefact_paths })
    }

    fn write_declared_output(
        &self,
        export: &OutputSpec,
        run_id: &str,
        all: &BTreeMap<String, Vec<Value>>,
    ) -> Result<Option<std::path::PathBuf>, FmfError> {
        let OutputSpec::Save { save, from, as_format } = export else {
            let OutputSpec::Export { export: sink, from } = export else { unreachable!() };
            warn!(sink = %sink, from = %from, "named external sink exports are not wired up; skipping");
            return Ok(None);
        };
        let values = all.get(from).ok_or_else(|| FmfError::config(format!("output export references unknown step output {from:?}")))?;
        let resolved_path = save.replace("${run_id}", run_id);
        let path = std::path::PathBuf::from(resolved_path);
        if let Some(parent) = path.parent() {
            fmf_artefact::ensure_dir(parent)?;
        }
        match as_format {
            ExportFormat::Jsonl => {
                fmf_artefact::write_jsonl(&path, values.iter())?;
            }
            ExportFormat::Csv => write_csv(&path, values)?,
            ExportFormat::Parquet => {
                return Err(FmfError::export("writing .parquet outputs requires an optional dependency that is not installed"));
            }
        }
        Ok(Some(path))
    }
}

fn write_csv(path: &std::path::Path, values: &[Value]) -> Result<(), FmfError> {
    let mut headers: Vec<String> = Vec::new();
    for value in values {
        if let Value::Object(map) = value {
            for key in map.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
    }
    let file = std::fs::File::create(path).map_err(|e| FmfError::export(format!("failed to create {}: {e}", path.display())))?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(&headers).map_err(|e| FmfError::export(format!("failed to write CSV header: {e}")))?;
    for value in values {
        let row: Vec<String> = headers
            .iter()
            .map(|h| match value.get(h) {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            })
            .collect();
        writer.write_record(&row).map_err(|e| FmfError::export(format!("failed to write CSV row: {e}")))?;
    }
    writer.flush().map_err(|e| FmfError::export(format!("failed to flush CSV writer: {e}")))
}

fn split_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), data.to_string()))
}

fn chain_inputs_summary(chain: &ChainConfig) -> Value {
    serde_json::json!({
        "connector": chain.inputs.connector,
        "select": chain.inputs.select,
        "mode": chain.inputs.mode,
    })
}

/// Generate a run id as a UTC timestamp, `YYYYMMDDTHHMMSSZ`.
#[must_use]
pub fn generate_run_id() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}
