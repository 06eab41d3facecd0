//! dxflow CLI — run the diagnosis pipeline against an intake file.
//!
//! Usage:
//!   dxflow run --intake <file> [--profiles <file>] [--corpus <file>] [--no-rag]
//!   dxflow preprocess --intake <file> [--profiles <file>]

use clap::{Parser, Subcommand};
use dxflow::{
    HttpModelFactory, InMemoryIndex, IntakeRecord, ModelProfiles, ModelResolver, OpenAiEmbedder,
    Pipeline, PipelineConfig, ResolverConfig, RetrievalAdapter,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "dxflow",
    version,
    about = "Staged differential-diagnosis pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full nine-stage pipeline
    Run {
        /// Path to the intake JSON file
        #[arg(long)]
        intake: PathBuf,
        /// Path to the model profiles JSON file
        #[arg(long)]
        profiles: Option<PathBuf>,
        /// Path to a pre-embedded corpus JSON file for retrieval
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Disable knowledge-base retrieval (synthetic context is used)
        #[arg(long)]
        no_rag: bool,
    },
    /// Normalize the intake only, for caller-side confirmation
    Preprocess {
        /// Path to the intake JSON file
        #[arg(long)]
        intake: PathBuf,
        /// Path to the model profiles JSON file
        #[arg(long)]
        profiles: Option<PathBuf>,
    },
}

/// One pre-embedded corpus entry.
#[derive(Deserialize)]
struct CorpusEntry {
    id: String,
    #[serde(default)]
    corpus: Option<String>,
    vector: Vec<f32>,
    content: String,
}

fn default_profiles_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".config"));
    config_dir.join("dxflow").join("model_profiles.json")
}

fn load_intake(path: &Path) -> Result<IntakeRecord, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read intake file {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("intake file is malformed: {e}"))
}

fn build_retrieval(
    env: &HashMap<String, String>,
    config: &PipelineConfig,
    corpus: Option<&Path>,
    no_rag: bool,
) -> Result<RetrievalAdapter, String> {
    if no_rag {
        return Ok(RetrievalAdapter::disabled());
    }
    let Some(corpus_path) = corpus else {
        return Ok(RetrievalAdapter::disabled());
    };
    let Some(embeddings_url) = env.get("DXFLOW_EMBEDDINGS_URL") else {
        return Err("--corpus requires DXFLOW_EMBEDDINGS_URL to embed queries".to_string());
    };

    let text = std::fs::read_to_string(corpus_path)
        .map_err(|e| format!("cannot read corpus file {}: {e}", corpus_path.display()))?;
    let entries: Vec<CorpusEntry> =
        serde_json::from_str(&text).map_err(|e| format!("corpus file is malformed: {e}"))?;
    let mut index = InMemoryIndex::new();
    for entry in entries {
        index.insert(entry.id, entry.corpus.as_deref(), entry.vector, entry.content);
    }

    let model = env
        .get("DXFLOW_EMBEDDINGS_MODEL")
        .cloned()
        .unwrap_or_else(|| "text-embedding-3-small".to_string());
    let mut embedder = OpenAiEmbedder::new(embeddings_url.clone(), model);
    if let Some(key) = env.get("OPENAI_API_KEY") {
        embedder = embedder.with_api_key(key.clone());
    }
    Ok(RetrievalAdapter::new(
        Arc::new(embedder),
        Arc::new(index),
        config.snippet_max_chars,
    ))
}

fn build_pipeline(
    profiles: Option<PathBuf>,
    corpus: Option<PathBuf>,
    no_rag: bool,
) -> Result<Pipeline, String> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let config = PipelineConfig::from_env(&env);
    let resolver_defaults = ResolverConfig::from_env(&env);
    let retrieval = build_retrieval(&env, &config, corpus.as_deref(), no_rag)?;

    let profiles_path = profiles.unwrap_or_else(default_profiles_path);
    let profiles = ModelProfiles::from_file(&profiles_path);

    let api_key = env.get("OPENAI_API_KEY").cloned();
    let factory = Arc::new(HttpModelFactory::new(api_key, config.call_timeout));
    let resolver = ModelResolver::new(profiles, resolver_defaults, factory);
    Ok(Pipeline::new(resolver, retrieval, config))
}

async fn cmd_run(
    intake: PathBuf,
    profiles: Option<PathBuf>,
    corpus: Option<PathBuf>,
    no_rag: bool,
) -> Result<(), String> {
    let intake = load_intake(&intake)?;
    let pipeline = build_pipeline(profiles, corpus, no_rag)?;
    let output = pipeline
        .run_with_progress(&intake, |event| {
            eprintln!("[{}/{}] {}", event.ordinal, event.total, event.label);
        })
        .await
        .map_err(|e| e.to_string())?;
    let rendered =
        serde_json::to_string_pretty(&output).map_err(|e| format!("cannot render output: {e}"))?;
    println!("{rendered}");
    Ok(())
}

async fn cmd_preprocess(intake: PathBuf, profiles: Option<PathBuf>) -> Result<(), String> {
    let intake = load_intake(&intake)?;
    let pipeline = build_pipeline(profiles, None, true)?;
    let preview = pipeline
        .preprocess_symptoms(&intake)
        .await
        .map_err(|e| e.to_string())?;
    let rendered = serde_json::to_string_pretty(&preview)
        .map_err(|e| format!("cannot render output: {e}"))?;
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            intake,
            profiles,
            corpus,
            no_rag,
        } => cmd_run(intake, profiles, corpus, no_rag).await,
        Commands::Preprocess { intake, profiles } => cmd_preprocess(intake, profiles).await,
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
