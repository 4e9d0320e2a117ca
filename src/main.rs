//! siterag CLI entry point

use clap::{Parser, Subcommand};
use siterag::config::default_db_path;
use siterag::embed::OpenAiEmbedder;
use siterag::events::TracingSink;
use siterag::llm::OpenAiCompletions;
use siterag::store::SqliteStore;
use siterag::{EngineConfig, RagEngine, RagQuery};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "siterag")]
#[command(version, about = "Hybrid retrieval-augmented answering over an organization's website", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover, classify, and index an organization's website
    Index {
        /// Organization id
        #[arg(long)]
        org: i64,

        /// Website root URL
        #[arg(long)]
        url: String,
    },

    /// Ask a question about an organization
    Query {
        /// Organization id
        #[arg(long)]
        org: i64,

        /// The question
        question: String,

        /// Cap on pages fetched for this query
        #[arg(long)]
        max_pages: Option<usize>,

        /// Skip the cache and fetch fresh content
        #[arg(long)]
        force_web: bool,
    },

    /// Drop cached summaries for specific URLs
    Invalidate {
        /// Organization id
        #[arg(long)]
        org: i64,

        /// URLs whose content changed
        urls: Vec<String>,
    },

    /// Query-log aggregates for an organization
    Analytics {
        /// Organization id
        #[arg(long)]
        org: i64,

        /// Days of history to aggregate
        #[arg(long, default_value = "30")]
        days: i64,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| default_db_path().with_file_name("siterag.toml"));
    let config = EngineConfig::load(&config_path)?;

    let store = SqliteStore::connect(&config.db_path).await?;
    let embedder = Arc::new(OpenAiEmbedder::new(&config)?);
    let completions = Arc::new(OpenAiCompletions::new(&config)?);
    let engine = RagEngine::new(store, embedder, completions, config, Arc::new(TracingSink))?;

    match cli.command {
        Commands::Index { org, url } => {
            let report = engine.initialize_index(org, &url).await?;
            println!(
                "Indexed {} pages ({} accessible) in {:.1}s via {}, status: {}",
                report.pages_discovered,
                report.pages_accessible,
                report.duration.as_secs_f64(),
                if report.via_sitemap { "sitemap" } else { "crawl" },
                report.status,
            );
            for error in &report.errors {
                eprintln!("  error: {}", error);
            }
        }
        Commands::Query {
            org,
            question,
            max_pages,
            force_web,
        } => {
            let mut request = RagQuery::new(org, question);
            request.max_web_pages = max_pages;
            request.force_web_search = force_web;
            let result = engine.query(request).await;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}\n", result.answer);
                println!(
                    "confidence {:.2} | intent {} | {}ms | {}",
                    result.confidence,
                    result.query_intent,
                    result.response_time_ms,
                    if result.cache_hit { "cache hit" } else { "cache miss" },
                );
                for source in &result.sources {
                    println!("  [{:?}] {} ({})", source.source_type, source.title, source.url);
                }
            }
        }
        Commands::Invalidate { org, urls } => {
            let deleted = engine.invalidate(org, &urls).await?;
            println!("Invalidated {} cached pages", deleted);
        }
        Commands::Analytics { org, days } => {
            let analytics = engine.analytics(org, days).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&analytics)?);
            } else {
                println!("Queries (last {} days): {}", days, analytics.total_queries);
                println!("Avg confidence: {:.2}", analytics.avg_confidence);
                println!("Cache hit rate: {:.0}%", analytics.cache_hit_rate * 100.0);
                println!("Web search rate: {:.0}%", analytics.web_search_rate * 100.0);
                println!("Avg response: {:.0}ms", analytics.avg_response_time_ms);
                for intent in &analytics.popular_intents {
                    println!("  {} × {}", intent.intent, intent.count);
                }
            }
        }
    }

    Ok(())
}
