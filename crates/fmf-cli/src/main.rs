// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

mod commands;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use commands::SchemaKind;
use fmf_chain::{ChainConfig, ChainEngine, CostRates, JoinLimits, RagPipelineSource};
use fmf_config::{ConnectorConfig, EngineConfig, ProviderConfig};
use fmf_connect::{Connector, LocalConnector, ObjectStoreConnector, Selector};
use fmf_provider_bedrock::{BedrockConfig, BedrockProvider, StreamingSupport};
use fmf_provider_openai::{OpenAiConfig, OpenAiProvider};
use fmf_prompt::PromptRegistry;
use fmf_rag::{Modality, RagPipelineConfig};
use fmf_retry::RetryConfig;
use fmf_runtime::InferenceProvider;
use fmf_split::Splitter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 1;

#[derive(Parser, Debug)]
#[command(name = "fmf", version, about = "Batch document-processing chain executor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to an engine configuration file (YAML). Defaults are used if omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Named profile to overlay on top of the base configuration.
    #[arg(long, global = true)]
    profile: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a chain file to completion.
    Run {
        /// Path to a chain definition (YAML).
        chain: PathBuf,

        /// Name of the configured provider to use. Required if more than one is configured.
        #[arg(long)]
        provider: Option<String>,

        /// Directory artefacts are written under. Overrides the configured default.
        #[arg(long)]
        artefacts_dir: Option<PathBuf>,

        /// Explicit run id. A content-derived id is generated if omitted.
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Parse and sanity-check a chain file without running it.
    Validate {
        /// Path to a chain definition (YAML).
        chain: PathBuf,
    },

    /// Load, merge, and validate the engine configuration without running anything.
    ConfigCheck,

    /// Print the JSON schema for a chain or engine configuration file.
    Schema {
        #[arg(value_enum)]
        kind: SchemaArg,
    },

    /// Pretty-print a run manifest (`run.yaml`) for inspection.
    Inspect {
        /// Path to a run manifest file.
        manifest: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum SchemaArg {
    Chain,
    Config,
}

impl From<SchemaArg> for SchemaKind {
    fn from(value: SchemaArg) -> Self {
        match value {
            SchemaArg::Chain => SchemaKind::Chain,
            SchemaArg::Config => SchemaKind::Config,
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fmf=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(EXIT_RUNTIME_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { chain, provider, artefacts_dir, run_id } => {
            run_chain(cli.config.as_deref(), cli.profile.as_deref(), &chain, provider, artefacts_dir, run_id).await
        }
        Commands::Validate { chain } => {
            let name = commands::validate_chain_file(&chain)?;
            println!("chain '{name}' is valid");
            Ok(())
        }
        Commands::ConfigCheck => {
            let (config, warnings) = commands::config_check(cli.config.as_deref(), cli.profile.as_deref())?;
            for warning in &warnings {
                tracing::warn!("{warning}");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Schema { kind } => {
            println!("{}", commands::schema_json(kind.into())?);
            Ok(())
        }
        Commands::Inspect { manifest } => {
            println!("{}", commands::inspect_manifest_file(&manifest)?);
            Ok(())
        }
    }
}

async fn run_chain(
    config_path: Option<&Path>,
    profile: Option<&str>,
    chain_path: &Path,
    provider_name: Option<String>,
    artefacts_dir_override: Option<PathBuf>,
    run_id: Option<String>,
) -> Result<()> {
    let (config, warnings) = commands::config_check(config_path, profile)?;
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let chain_content = std::fs::read_to_string(chain_path)
        .with_context(|| format!("read chain file '{}'", chain_path.display()))?;
    let chain: ChainConfig = serde_yaml::from_str(&chain_content)
        .with_context(|| format!("parse chain YAML from '{}'", chain_path.display()))?;

    let connectors = build_connectors(&config)?;
    let (provider, resolved_provider_name) = build_provider(&config, provider_name.as_deref())?;
    let prompt_registry = Arc::new(
        PromptRegistry::open(".", "prompts/index.yaml").context("open prompt registry")?,
    );
    let rag_sources = build_rag_sources(&config)?;
    let cost_rates = config.cost.map(|c| CostRates { prompt_per_1k: c.prompt_per_1k, completion_per_1k: c.completion_per_1k });

    let engine = ChainEngine {
        connectors,
        provider,
        provider_name: resolved_provider_name,
        prompt_registry,
        rag_sources,
        retry_config: RetryConfig::default(),
        join_limits: JoinLimits::from_env(),
        cost_rates,
        metrics: Arc::new(fmf_telemetry::Metrics::default()),
        retain_last: config.retain_last,
    };

    let artefacts_dir = artefacts_dir_override
        .or_else(|| config.artefacts_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("artefacts"));

    let outcome = engine.run(&chain, &artefacts_dir, profile.map(str::to_string), run_id).await?;

    println!("run '{}' complete: {} artefact(s) written", outcome.manifest.run_id, outcome.artefact_paths.len());
    if let Some(cost) = outcome.manifest.cost_estimate_usd {
        println!("estimated cost: ${cost:.4}");
    }
    Ok(())
}

fn build_connectors(config: &EngineConfig) -> Result<BTreeMap<String, Arc<dyn Connector>>> {
    let mut connectors: BTreeMap<String, Arc<dyn Connector>> = BTreeMap::new();
    for (name, connector) in &config.connectors {
        let built: Arc<dyn Connector> = match connector {
            ConnectorConfig::Fs { root } => Arc::new(LocalConnector::new(name.clone(), root.clone())),
            ConnectorConfig::S3 { base_url, bucket, prefix, kms_required } => Arc::new(
                ObjectStoreConnector::new(name.clone(), base_url.clone(), bucket.clone(), prefix.clone(), *kms_required),
            ),
            ConnectorConfig::Sharepoint { .. } => {
                bail!("connector '{name}': sharepoint connectors are not implemented")
            }
        };
        connectors.insert(name.clone(), built);
    }
    Ok(connectors)
}

fn build_provider(config: &EngineConfig, requested: Option<&str>) -> Result<(Arc<dyn InferenceProvider>, String)> {
    let name = match requested {
        Some(name) => name.to_string(),
        None => match config.providers.len() {
            1 => config.providers.keys().next().unwrap().clone(),
            0 => bail!("no providers configured"),
            _ => bail!("multiple providers configured; pass --provider to select one"),
        },
    };
    let provider_config = config
        .providers
        .get(&name)
        .ok_or_else(|| anyhow::anyhow!("unknown provider '{name}'"))?;

    let provider: Arc<dyn InferenceProvider> = match provider_config {
        ProviderConfig::Openai { endpoint, model, api_version, api_key_env, rate_per_sec } => {
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("provider '{name}': missing environment variable '{api_key_env}'"))?;
            Arc::new(OpenAiProvider::new(OpenAiConfig {
                endpoint: endpoint.clone(),
                api_version: api_version.clone(),
                deployment: model.clone(),
                api_key,
                rate_per_sec: *rate_per_sec,
            }))
        }
        ProviderConfig::Bedrock { endpoint, model, api_key_env, rate_per_sec, streaming } => {
            let api_key = std::env::var(api_key_env)
                .with_context(|| format!("provider '{name}': missing environment variable '{api_key_env}'"))?;
            Arc::new(BedrockProvider::new(BedrockConfig {
                endpoint: endpoint.clone(),
                model_id: model.clone(),
                api_key,
                rate_per_sec: *rate_per_sec,
                streaming: if *streaming { StreamingSupport::Enabled } else { StreamingSupport::Disabled },
            }))
        }
    };
    Ok((provider, name))
}

fn build_rag_sources(config: &EngineConfig) -> Result<BTreeMap<String, RagPipelineSource>> {
    let mut sources = BTreeMap::new();
    for (name, def) in &config.rag_pipelines {
        let modalities = match def.modalities {
            fmf_config::RagModalityConfig::Text => Modality::Text,
            fmf_config::RagModalityConfig::Image => Modality::Image,
            fmf_config::RagModalityConfig::Both => Modality::Both,
        };
        let splitter = match def.splitter {
            fmf_config::RagSplitterConfig::BySentence => Splitter::BySentence,
            fmf_config::RagSplitterConfig::ByParagraph => Splitter::ByParagraph,
        };
        let pipeline_config = RagPipelineConfig {
            name: name.clone(),
            modalities,
            max_text_items: def.max_text_items,
            max_image_items: def.max_image_items,
            select: Selector { include: def.select.clone(), exclude: def.exclude.clone() },
            chunk_max_tokens: def.chunk_max_tokens,
            chunk_overlap: def.chunk_overlap,
            splitter,
        };
        sources.insert(name.clone(), RagPipelineSource { connector: def.connector.clone(), config: pipeline_config });
    }
    Ok(sources)
}
