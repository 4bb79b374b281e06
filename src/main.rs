//! Synthesis CLI.
//!
//! Operator entry points over the library: schema init, the HTTP server,
//! collection management, file/URL ingestion, search, synthesis, and cost
//! reporting. Run `synthesis --help` for the full surface.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use synthesis::config::{load_config, Config};
use synthesis::costs::CostTracker;
use synthesis::embedding::EmbeddingRouter;
use synthesis::error::SynthesisError;
use synthesis::fetch;
use synthesis::ingest::{IngestRequest, Ingestor};
use synthesis::rerank::Reranker;
use synthesis::search::{SearchEngine, SearchOptions};
use synthesis::storage::Storage;
use synthesis::synthesis::SynthesisEngine;

#[derive(Parser)]
#[command(
    name = "synthesis",
    about = "Synthesis — a retrieval-augmented knowledge engine",
    version
)]
struct Cli {
    /// Path to configuration file
    #[arg(long, global = true, default_value = "./config/synthesis.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Start the HTTP server
    Serve,

    /// Manage collections
    Collections {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Ingest a local file or a fetched web page into a collection
    Ingest {
        /// Target collection id
        collection_id: String,

        /// Path to a local file
        #[arg(long, conflicts_with = "url")]
        file: Option<PathBuf>,

        /// URL to fetch (SSRF-guarded)
        #[arg(long, conflicts_with = "file")]
        url: Option<String>,
    },

    /// Search a collection
    Search {
        /// Search query
        query: String,

        /// Collection id
        #[arg(long)]
        collection_id: String,

        /// Search mode: vector or hybrid
        #[arg(long)]
        mode: Option<String>,

        /// Re-rank results with a cross-encoder
        #[arg(long)]
        rerank: bool,

        /// Maximum number of results
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Synthesise the top results for a query into approaches
    Synthesize {
        query: String,

        #[arg(long)]
        collection_id: String,
    },

    /// Show spend, budget state, and recent alerts
    Costs,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// List collections
    List,
    /// Create a collection
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a collection and everything in it
    Delete { id: String },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

/// Everything a CLI command needs, wired the same way the server wires it.
struct Runtime {
    storage: Storage,
    ingestor: Arc<Ingestor>,
    engine: Arc<SearchEngine>,
    synthesis: Arc<SynthesisEngine>,
    costs: Arc<CostTracker>,
}

async fn runtime(config: &Config) -> anyhow::Result<Runtime> {
    let pool = synthesis::db::connect(config).await?;
    synthesis::migrate::apply(&pool).await?;
    let storage = Storage::new(pool);
    let costs = CostTracker::start(storage.clone(), config.budget.monthly_usd).await?;
    let router = EmbeddingRouter::new(config.embedding.clone(), Arc::clone(&costs));
    let reranker = Arc::new(Reranker::new(config.rerank.clone(), Arc::clone(&costs)));
    let engine = Arc::new(SearchEngine::new(
        storage.clone(),
        router.clone(),
        Arc::clone(&reranker),
        config.clone(),
    ));
    let synthesis_engine = Arc::new(SynthesisEngine::new(
        router.clone(),
        Arc::clone(&costs),
        config.synthesis.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(storage.clone(), router, config.clone()));
    Ok(Runtime {
        storage,
        ingestor,
        engine,
        synthesis: synthesis_engine,
        costs,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            synthesis::migrate::run_migrations(&config).await?;
            println!("database initialized at {}", config.db.path.display());
        }

        Commands::Serve => {
            synthesis::server::run_server(&config).await?;
        }

        Commands::Collections { action } => {
            let rt = runtime(&config).await?;
            match action {
                CollectionAction::List => {
                    let collections = rt.storage.list_collections().await?;
                    if collections.is_empty() {
                        println!("No collections.");
                    }
                    for c in collections {
                        println!("{}  {}", c.id, c.name);
                    }
                }
                CollectionAction::Create { name, description } => {
                    let c = rt
                        .storage
                        .create_collection(&name, description.as_deref())
                        .await?;
                    println!("created collection {}", c.id);
                }
                CollectionAction::Delete { id } => {
                    rt.storage.delete_collection(&id).await?;
                    println!("deleted collection {id}");
                }
            }
        }

        Commands::Ingest {
            collection_id,
            file,
            url,
        } => {
            let rt = runtime(&config).await?;
            let request = match (file, url) {
                (Some(path), None) => {
                    let bytes = std::fs::read(&path)?;
                    let file_name = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .ok_or_else(|| {
                            SynthesisError::InvalidInput(format!(
                                "invalid file name: {}",
                                path.display()
                            ))
                        })?
                        .to_string();
                    IngestRequest {
                        collection_id,
                        file_name,
                        bytes,
                        content_type: None,
                        source_url: None,
                        metadata: None,
                    }
                }
                (None, Some(url)) => {
                    let page =
                        fetch::fetch_url(&url, std::time::Duration::from_secs(30)).await?;
                    let file_name = page
                        .final_url
                        .rsplit('/')
                        .next()
                        .filter(|n| n.contains('.'))
                        .unwrap_or("page.html")
                        .to_string();
                    IngestRequest {
                        collection_id,
                        file_name,
                        bytes: page.bytes,
                        content_type: Some(page.content_type),
                        source_url: Some(page.final_url),
                        metadata: None,
                    }
                }
                _ => anyhow::bail!("pass exactly one of --file or --url"),
            };

            let doc = rt.ingestor.create_document(&request).await?;
            println!("ingesting document {}", doc.id);
            // CLI runs the pipeline inline so failures are visible.
            rt.ingestor.run_pipeline(doc.clone()).await?;
            let done = rt.storage.get_document(&doc.id).await?;
            println!("status: {}", done.status.as_str());
        }

        Commands::Search {
            query,
            collection_id,
            mode,
            rerank,
            limit,
        } => {
            let rt = runtime(&config).await?;
            let outcome = rt
                .engine
                .search(SearchOptions {
                    query,
                    collection_id,
                    top_k: limit,
                    mode,
                    rerank,
                    ..SearchOptions::default()
                })
                .await?;

            if outcome.results.is_empty() {
                println!("No results.");
            }
            for (i, result) in outcome.results.hybrid().iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({:?})",
                    i + 1,
                    result.result.score,
                    result.result.document_title,
                    result.source,
                );
                println!(
                    "    excerpt: \"{}\"",
                    result.result.text.chars().take(120).collect::<String>().replace('\n', " ")
                );
            }
            println!(
                "mode={} vector={} bm25={} latency={}ms{}",
                outcome.search_metadata.mode,
                outcome.search_metadata.vector_results,
                outcome.search_metadata.bm25_results,
                outcome.search_metadata.latency_ms,
                if outcome.fallback_used { " (degraded)" } else { "" },
            );
        }

        Commands::Synthesize {
            query,
            collection_id,
        } => {
            let rt = runtime(&config).await?;
            if !rt.synthesis.enabled() {
                anyhow::bail!("synthesis is disabled; set [synthesis] enabled = true");
            }
            let outcome = rt
                .engine
                .search(SearchOptions {
                    query: query.clone(),
                    collection_id,
                    top_k: Some(synthesis::search::TOP_K_CAP),
                    mode: Some("hybrid".to_string()),
                    ..SearchOptions::default()
                })
                .await?;
            let candidates: Vec<_> = outcome.results.hybrid().into_iter().cloned().collect();
            let result = rt.synthesis.synthesize(&query, candidates).await?;

            for approach in &result.approaches {
                println!(
                    "approach: {} (consensus {:.2}, {} sources)",
                    approach.method,
                    approach.consensus_score,
                    approach.sources.len()
                );
            }
            for conflict in &result.conflicts {
                println!(
                    "conflict [{}]: {} vs {}",
                    match conflict.severity {
                        synthesis::models::ConflictSeverity::High => "high",
                        synthesis::models::ConflictSeverity::Medium => "medium",
                        synthesis::models::ConflictSeverity::Low => "low",
                    },
                    conflict.source_a,
                    conflict.source_b
                );
                println!("    {}", conflict.recommendation);
            }
            match &result.recommended {
                Some(method) => println!("recommended: {method}"),
                None => println!("no recommendation"),
            }
        }

        Commands::Costs => {
            let rt = runtime(&config).await?;
            let monthly = rt.storage.monthly_spend().await?;
            let daily = rt.storage.daily_spend().await?;
            println!("monthly spend: ${monthly:.4}");
            println!("daily spend:   ${daily:.4}");
            if rt.costs.budget_usd() > 0.0 {
                println!("budget:        ${:.2}", rt.costs.budget_usd());
                println!("fallback mode: {}", rt.costs.fallback_active());
            }
            let alerts = rt.storage.recent_alerts(10).await?;
            for alert in alerts {
                println!(
                    "alert: {} at ${:.4} (threshold ${:.2})",
                    alert.kind.as_str(),
                    alert.current_spend_usd,
                    alert.threshold_usd
                );
            }
        }
    }

    Ok(())
}
