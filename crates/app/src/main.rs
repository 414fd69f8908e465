mod handlers;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use rag_search_core::config::{
    DEFAULT_CHAT_MODEL, DEFAULT_EMBED_DIM, DEFAULT_EMBED_MODEL, DEFAULT_INDEX_NAME,
    DEFAULT_OPENAI_BASE_URL, DEFAULT_SEARCH_API_VERSION,
};
use rag_search_core::retrieval::DEFAULT_TOP_K;
use rag_search_core::{
    evaluate, load_csv_folder, load_golden_set, load_pdf_folder, write_results,
    AnswerSynthesizer, AzureSearchStore, CharacterNgramEmbedder, ChunkStrategy, DocType, Embedder,
    EmbeddingError, IndexManager, IndexSchema, Ingestor, IngestionOptions, LoadReport,
    LopdfExtractor, OpenAiChat, OpenAiEmbedder, PromptTemplate, QueryFilters, QueryOrchestrator,
    RetrievalService, RetryPolicy, ServiceConfig, SimilarityAlgorithm, TextPreprocessor,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "rag-search", version, about = "Index documents and answer questions over them")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    service: ServiceArgs,
}

#[derive(Args)]
struct ServiceArgs {
    /// Search service endpoint, e.g. https://<name>.search.windows.net
    #[arg(long, env = "AZURE_SEARCH_ENDPOINT")]
    search_endpoint: Url,

    /// Search service admin key
    #[arg(long, env = "AZURE_SEARCH_API_KEY", hide_env_values = true)]
    search_api_key: String,

    /// Index name
    #[arg(long, env = "AZURE_SEARCH_INDEX", default_value = DEFAULT_INDEX_NAME)]
    index_name: String,

    /// Search REST api-version
    #[arg(long, env = "SEARCH_API_VERSION", default_value = DEFAULT_SEARCH_API_VERSION)]
    search_api_version: String,

    /// Vector dimension of the index and the embedding model
    #[arg(long, env = "EMBED_DIM", default_value_t = DEFAULT_EMBED_DIM)]
    embed_dim: usize,

    /// Embedding model name
    #[arg(long, env = "EMBED_MODEL", default_value = DEFAULT_EMBED_MODEL)]
    embed_model: String,

    /// Key for the embedding and chat provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, default_value = "")]
    openai_key: String,

    /// Base URL of an OpenAI-compatible provider
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,

    /// Chat model used for answers
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Per-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    /// Attempts per provider call, including the first
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    /// Embed with the local character n-gram hasher instead of the provider
    #[arg(long, default_value_t = false)]
    offline_embeddings: bool,

    /// File with a custom answer prompt
    #[arg(long)]
    prompt_template: Option<PathBuf>,
}

impl ServiceArgs {
    fn config(&self) -> ServiceConfig {
        ServiceConfig {
            search_endpoint: self.search_endpoint.clone(),
            search_api_key: self.search_api_key.clone(),
            index_name: self.index_name.clone(),
            search_api_version: self.search_api_version.clone(),
            embed_dim: self.embed_dim,
            embed_model: self.embed_model.clone(),
            openai_key: self.openai_key.clone(),
            openai_base_url: self.openai_base_url.clone(),
            chat_model: self.chat_model.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Hnsw,
    ExhaustiveKnn,
}

impl From<AlgorithmArg> for SimilarityAlgorithm {
    fn from(value: AlgorithmArg) -> Self {
        match value {
            AlgorithmArg::Hnsw => SimilarityAlgorithm::Hnsw,
            AlgorithmArg::ExhaustiveKnn => SimilarityAlgorithm::ExhaustiveKnn,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Delete and recreate the index with the standard schema.
    CreateIndex {
        #[arg(long, value_enum, default_value = "hnsw")]
        algorithm: AlgorithmArg,
        /// Leave out the semantic ranking configuration.
        #[arg(long, default_value_t = false)]
        no_semantic: bool,
    },
    /// Load PDF and CSV folders, embed them and upload to the index.
    Ingest {
        /// Folder scanned recursively for PDFs.
        #[arg(long)]
        pdf_dir: Option<PathBuf>,
        /// Folder scanned recursively for CSV files.
        #[arg(long)]
        csv_dir: Option<PathBuf>,
        /// Recreate the index before uploading.
        #[arg(long, default_value_t = false)]
        recreate: bool,
        #[arg(long, value_enum, default_value = "hnsw")]
        algorithm: AlgorithmArg,
        /// Leave out the semantic ranking configuration when recreating.
        #[arg(long, default_value_t = false)]
        no_semantic: bool,
        /// Maximum characters per chunk.
        #[arg(long, default_value = "1000")]
        chunk_size: usize,
        /// Pack whole paragraphs into chunks where they fit.
        #[arg(long, default_value_t = false)]
        paragraph_chunks: bool,
        /// Records per upload call.
        #[arg(long, default_value = "500")]
        batch_size: usize,
        /// Documents embedded concurrently.
        #[arg(long, default_value = "4")]
        concurrency: usize,
        /// CSV column holding the text to embed.
        #[arg(long, default_value = "description")]
        csv_text_field: String,
    },
    /// Answer a question from the index.
    Query {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
        /// Only hits from this source file.
        #[arg(long)]
        source: Option<String>,
        /// Only hits of this document type (pdf or csv).
        #[arg(long)]
        doc_type: Option<DocType>,
    },
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value = "8000")]
        port: u16,
        #[arg(long, default_value_t = server::DEFAULT_MAX_BODY_SIZE)]
        max_body_size: usize,
    },
    /// Run a golden set of questions and write a results CSV.
    Eval {
        #[arg(long)]
        golden: PathBuf,
        #[arg(long, default_value = "results.csv")]
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,
    },
}

/// Provider-backed or offline embeddings behind one type.
enum EmbeddingBackend {
    Remote(OpenAiEmbedder),
    Offline(CharacterNgramEmbedder),
}

impl EmbeddingBackend {
    fn from_config(config: &ServiceConfig, offline: bool) -> Result<Self, EmbeddingError> {
        if offline {
            Ok(Self::Offline(CharacterNgramEmbedder::new(config.embed_dim)))
        } else {
            Ok(Self::Remote(OpenAiEmbedder::from_config(config)?))
        }
    }
}

#[async_trait]
impl Embedder for EmbeddingBackend {
    fn dimensions(&self) -> usize {
        match self {
            Self::Remote(embedder) => embedder.dimensions(),
            Self::Offline(embedder) => embedder.dimensions(),
        }
    }

    fn model(&self) -> &str {
        match self {
            Self::Remote(embedder) => embedder.model(),
            Self::Offline(embedder) => embedder.model(),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        match self {
            Self::Remote(embedder) => embedder.embed(text).await,
            Self::Offline(embedder) => embedder.embed(text).await,
        }
    }
}

type Orchestrator = QueryOrchestrator<AzureSearchStore, OpenAiChat, EmbeddingBackend>;

fn build_orchestrator(config: &ServiceConfig, args: &ServiceArgs) -> anyhow::Result<Orchestrator> {
    config.validate_with_provider()?;

    let template = match &args.prompt_template {
        Some(path) => PromptTemplate::from_file(path)
            .with_context(|| format!("failed to load prompt template {}", path.display()))?,
        None => PromptTemplate::default(),
    };

    Ok(QueryOrchestrator::new(
        RetrievalService::new(AzureSearchStore::from_config(config)?, config.retry),
        AnswerSynthesizer::new(OpenAiChat::from_config(config)?, template),
        EmbeddingBackend::from_config(config, args.offline_embeddings)?,
        TextPreprocessor::new(Default::default())?,
    ))
}

fn index_schema(config: &ServiceConfig, algorithm: AlgorithmArg, no_semantic: bool) -> IndexSchema {
    let schema = IndexSchema::standard(&config.index_name, config.embed_dim, algorithm.into());
    if no_semantic {
        schema.without_semantic()
    } else {
        schema
    }
}

fn validate_for_embedding(config: &ServiceConfig, offline: bool) -> anyhow::Result<()> {
    if offline {
        config.validate()?;
    } else {
        config.validate_with_provider()?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.service.config();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index = %config.index_name,
        "rag-search boot"
    );

    match cli.command {
        Command::CreateIndex {
            algorithm,
            no_semantic,
        } => {
            config.validate()?;
            let manager = IndexManager::new(AzureSearchStore::from_config(&config)?, config.retry);
            let schema = index_schema(&config, algorithm, no_semantic);
            manager.recreate(&schema).await?;
            println!("index {} created ({} dimensions)", config.index_name, config.embed_dim);
        }
        Command::Ingest {
            pdf_dir,
            csv_dir,
            recreate,
            algorithm,
            no_semantic,
            chunk_size,
            paragraph_chunks,
            batch_size,
            concurrency,
            csv_text_field,
        } => {
            if pdf_dir.is_none() && csv_dir.is_none() {
                bail!("nothing to ingest: pass --pdf-dir and/or --csv-dir");
            }
            validate_for_embedding(&config, cli.service.offline_embeddings)?;

            let options = IngestionOptions {
                chunk_max_chars: chunk_size,
                chunk_strategy: if paragraph_chunks {
                    ChunkStrategy::Paragraph
                } else {
                    ChunkStrategy::Fixed
                },
                upload_batch_size: batch_size,
                embed_concurrency: concurrency,
                csv_text_field,
                ..IngestionOptions::default()
            };
            options.validate()?;

            let mut loaded = LoadReport::default();
            if let Some(folder) = &pdf_dir {
                loaded.merge(load_pdf_folder(&LopdfExtractor, folder));
            }
            if let Some(folder) = &csv_dir {
                loaded.merge(load_csv_folder(folder, &options.csv_text_field));
            }
            for skipped in &loaded.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped input");
            }
            info!(documents = loaded.documents.len(), "documents loaded");

            let store = AzureSearchStore::from_config(&config)?;
            let embedder = EmbeddingBackend::from_config(&config, cli.service.offline_embeddings)?;
            let ingestor = Ingestor::new(embedder, store.clone(), options, &config)?;

            let report = if recreate {
                let manager = IndexManager::new(store, config.retry);
                let schema = index_schema(&config, algorithm, no_semantic);
                ingestor.rebuild(&manager, &schema, &loaded.documents).await?
            } else {
                ingestor.ingest(&loaded.documents).await?
            };

            println!(
                "{} documents succeeded, {} failed, {} records written, {} inputs skipped",
                report.succeeded,
                report.failed.len(),
                report.records_written,
                loaded.skipped.len()
            );
            for failed in &report.failed {
                println!("  failed {}: {}", failed.doc_id, failed.reason);
            }
        }
        Command::Query {
            query,
            top_k,
            source,
            doc_type,
        } => {
            let orchestrator = build_orchestrator(&config, &cli.service)?;
            let filters = QueryFilters { source, doc_type };
            let response = orchestrator.answer_text(&query, &filters, top_k).await?;

            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!("sources: {}", response.sources.join(", "));
            }
            for hit in &response.results {
                println!("[{:.4}] {} ({})", hit.score, hit.id, hit.source);
            }
        }
        Command::Serve {
            bind,
            port,
            max_body_size,
        } => {
            let orchestrator = build_orchestrator(&config, &cli.service)?;
            server::serve(Arc::new(orchestrator), &bind, port, max_body_size).await?;
        }
        Command::Eval {
            golden,
            output,
            top_k,
        } => {
            let orchestrator = build_orchestrator(&config, &cli.service)?;
            let cases = load_golden_set(&golden)
                .with_context(|| format!("failed to read golden set {}", golden.display()))?;
            let summary = evaluate(&orchestrator, &cases, top_k).await;
            write_results(&output, &summary.outcomes)?;

            println!(
                "{} cases: {} answers matched, {} sources matched; results in {}",
                summary.outcomes.len(),
                summary.answer_hits(),
                summary.source_hits(),
                output.display()
            );
        }
    }

    Ok(())
}
