use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use sunzi_embed::ProviderKind;
use sunzi_rag::{
    ApiKey, Components, EnsureStatus, GeminiGenerator, QueryFailure, RagConfig, RagPipeline,
    StorageKind,
};
use sunzi_index::{RetrievalResult, ScoredChunk};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Words that end an interactive session.
const EXIT_WORDS: &[&str] = &["exit", "quit", "q", "cikis", "çıkış"];

/// Ask questions about a text corpus, answered by a language model grounded in
/// the passages most similar to the question.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus file (one teaching per line)
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Collection name
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Directory holding the index database
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep the index in memory instead of on disk
    #[arg(long, global = true)]
    memory: bool,

    /// Use the offline hashing embedder instead of the ONNX model
    #[arg(long, global = true)]
    hashing: bool,

    /// Embedding model id
    #[arg(long, global = true)]
    embedding_model: Option<String>,

    /// Generation model id
    #[arg(long, global = true)]
    model: Option<String>,

    /// Number of chunks retrieved per question
    #[arg(short = 'k', long, global = true)]
    top_k: Option<usize>,

    /// Drop retrieved chunks that repeat a higher-ranked chunk's text
    #[arg(long, global = true)]
    dedup: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the collection from the corpus
    Ingest {
        /// Rebuild even if the collection already matches the corpus and model
        #[arg(long)]
        force: bool,
    },
    /// Answer a single question
    Ask {
        /// The question
        #[arg(required = true)]
        question: Vec<String>,
        /// Print the retrieved passages after the answer
        #[arg(long)]
        show_context: bool,
    },
    /// Interactive question-and-answer session
    Chat {
        /// Print the retrieved passages after each answer
        #[arg(long)]
        show_context: bool,
    },
    /// Show the passages retrieved for a query, without generating an answer
    Search {
        /// The query
        #[arg(required = true)]
        query: Vec<String>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List collections in the index
    Collections {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// List generation models offered by the backend
    Models,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,sunzi={level},sunzi_rag={level},sunzi_embed={level},sunzi_index={level},sunzi_chunk={level}"
        ))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Configuration file, then command-line overrides.
fn load_config(args: &Args) -> anyhow::Result<RagConfig> {
    let mut config = RagConfig::load_or_default(args.config.as_deref())?;

    if let Some(corpus) = &args.corpus {
        config.corpus = corpus.clone();
    }
    if let Some(collection) = &args.collection {
        config.collection = collection.clone();
    }
    if let Some(db) = &args.db {
        config.storage.path = db.clone();
    }
    if args.memory {
        config.storage.mode = StorageKind::Memory;
    }
    if args.hashing {
        config.embedding.provider = ProviderKind::Hashing;
    }
    if let Some(model) = &args.embedding_model {
        config.embedding.model_name = model.clone();
    }
    if let Some(model) = &args.model {
        config.generation.model = model.clone();
    }
    if let Some(top_k) = args.top_k {
        config.top_k = top_k;
    }
    if args.dedup {
        config.dedup = true;
    }

    config.validate()?;
    Ok(config)
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config = load_config(&args)?;

    match args.command {
        Commands::Ingest { force } => {
            let components = Components::init(config, None).await?;
            let ingestor = components.ingestor()?;
            let collection = &components.config.collection;
            let corpus = &components.config.corpus;

            if force {
                let report = ingestor.ingest(collection, corpus).await?;
                println!(
                    "Ingested {} chunks into '{}' (generation {})",
                    report.chunks, report.collection, report.generation
                );
            } else {
                match ingestor.ensure(collection, corpus).await? {
                    EnsureStatus::Reused(info) => println!(
                        "Collection '{}' is up to date ({} chunks, generation {})",
                        info.name, info.entry_count, info.generation
                    ),
                    EnsureStatus::Rebuilt(report) => println!(
                        "Ingested {} chunks into '{}' (generation {})",
                        report.chunks, report.collection, report.generation
                    ),
                }
            }
            Ok(())
        }
        Commands::Ask {
            question,
            show_context,
        } => {
            let components = Components::init(config, ApiKey::from_env()).await?;
            let pipeline = components.pipeline()?;
            ensure_collection(&components).await?;

            let question = question.join(" ");
            let answer = pipeline.ask(&question).await?;
            println!("{}", answer.text);
            if show_context {
                print_context(&answer.context);
            }
            Ok(())
        }
        Commands::Chat { show_context } => {
            let components = Components::init(config, ApiKey::from_env()).await?;
            let pipeline = components.pipeline()?;
            ensure_collection(&components).await?;
            chat(&pipeline, show_context).await
        }
        Commands::Search { query, format } => {
            let components = Components::init(config, None).await?;
            ensure_collection(&components).await?;

            let config = &components.config;
            let results = components
                .retriever()
                .retrieve(&config.collection, &query.join(" "), config.top_k)
                .await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                }
                OutputFormat::Summary => {
                    println!("Found {} similar chunks:", results.len());
                    for scored in &results {
                        println!(
                            "  Similarity: {:.3} | ID: {} | Source: {} | {}",
                            scored.score,
                            scored.chunk.id(),
                            scored.chunk.source_label(),
                            preview(scored.chunk.text(), 80)
                        );
                    }
                }
                OutputFormat::Full => print_context(&results),
            }
            Ok(())
        }
        Commands::Collections { format } => {
            let components = Components::init(config, None).await?;
            let collections = components.index.list_collections().await?;

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&collections)?);
                }
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Index: {}", components.index.storage_mode());
                    if collections.is_empty() {
                        println!("No collections");
                    }
                    for info in collections {
                        println!("{}", info.name);
                        println!("  Generation: {}", info.generation);
                        println!("  Entries: {}", info.entry_count);
                        if let Some(dimension) = info.dimension {
                            println!("  Dimension: {dimension}");
                        }
                        if let Some(model) = &info.meta.model_id {
                            println!("  Embedding model: {model}");
                        }
                        if format == OutputFormat::Full {
                            if let Some(fingerprint) = &info.meta.source_fingerprint {
                                println!("  Corpus fingerprint: {fingerprint}");
                            }
                        }
                        println!("  Built: {}", info.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
                    }
                }
            }
            Ok(())
        }
        Commands::Models => {
            let key = ApiKey::from_env().ok_or_else(|| {
                anyhow::anyhow!(
                    "no generation credential; set {}",
                    sunzi_rag::config::API_KEY_VARS.join(" or ")
                )
            })?;
            let generator = GeminiGenerator::new(&config.generation, key)?;
            let models = generator.list_models().await?;
            let chosen = sunzi_rag::choose_model(&config.generation.model, &models);

            println!("Models supporting generateContent:");
            for model in &models {
                let marker = if Some(model) == chosen.as_ref() { "*" } else { " " };
                println!(" {marker} {model}");
            }
            Ok(())
        }
    }
}

/// Build the collection from the configured corpus if it is missing or stale.
async fn ensure_collection(components: &Components) -> anyhow::Result<()> {
    let config = &components.config;
    if let EnsureStatus::Rebuilt(report) = components
        .ingestor()?
        .ensure(&config.collection, &config.corpus)
        .await?
    {
        eprintln!(
            "Built collection '{}' from {} ({} chunks)",
            report.collection,
            config.corpus.display(),
            report.chunks
        );
    }
    Ok(())
}

async fn chat(pipeline: &RagPipeline, show_context: bool) -> anyhow::Result<()> {
    println!("Ask a question, or type 'exit' to leave. Ctrl-C cancels an answer in progress.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\nQuestion: ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            break;
        }

        let cancel = async {
            // A failed handler install means Ctrl-C cannot be observed; never cancel then.
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        match pipeline.ask_with_cancel(question, cancel).await {
            Ok(answer) => {
                println!("\n{}", answer.text);
                if show_context {
                    print_context(&answer.context);
                }
            }
            Err(failure) => report_failure(&failure),
        }
    }

    println!("Goodbye.");
    Ok(())
}

fn report_failure(failure: &QueryFailure) {
    match failure.error.generation_reason() {
        Some(reason) => eprintln!("Error ({}, {reason}): {}", failure.kind(), failure.error),
        None => eprintln!("Error ({}): {}", failure.kind(), failure.error),
    }
}

fn print_context(results: &RetrievalResult) {
    println!("\nContext:");
    for ScoredChunk { chunk, score } in results {
        println!("[{}] {:.3} {}", chunk.source_label(), score, chunk.text());
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}...")
    }
}
