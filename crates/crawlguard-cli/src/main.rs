mod replay;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crawlguard_core::dedup::{DedupConfig, DeduplicationStore};
use crawlguard_core::ingest::{IngestOutcome, IngestService, TracingIngestReporter};
use crawlguard_core::memory_store::MemoryStore;
use crawlguard_core::retry::{RetryExecutor, RetryPolicy};
use crawlguard_core::traits::KeyValueStore;
use crawlguard_core::validation::{ContentIntegrityValidator, ValidationConfig, ValidationResult};
use crawlguard_redis::{RedisConfig, RedisStore};

use crate::replay::{ReplayFetcher, load_articles};

#[derive(Parser)]
#[command(
    name = "crawlguard",
    version,
    about = "Resilience and deduplication toolkit for news crawlers"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay crawled articles (JSON Lines) through claim, fetch, validate and mark
    Ingest {
        /// File with one JSON article ({"title","url","text"}) per line
        #[arg(short, long)]
        input: PathBuf,

        /// Namespace for URL claims (defaults to a fresh replay namespace)
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: Option<String>,

        /// Use an in-process store instead of Redis
        #[arg(long, default_value_t = false)]
        memory: bool,
    },

    /// Run the content quality gate on a single article
    Validate {
        #[arg(long)]
        title: String,

        #[arg(short, long)]
        url: String,

        /// Article body
        #[arg(long, conflicts_with = "text_file", required_unless_present = "text_file")]
        text: Option<String>,

        /// Read the article body from a file
        #[arg(long)]
        text_file: Option<PathBuf>,
    },

    /// Claim a URL for a namespace
    Claim {
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: String,

        #[arg(short, long)]
        url: String,

        /// Claim expiry in seconds (defaults to CRAWLGUARD_DEFAULT_TTL_SECS)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Release a URL claim
    Unclaim {
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: String,

        #[arg(short, long)]
        url: String,
    },

    /// Show whether a URL is claimed or processed
    Status {
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: String,

        #[arg(short, long)]
        url: String,
    },

    /// List claimed or processed URLs in a namespace
    List {
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: String,
    },

    /// Count claimed or processed URLs and show counters for a namespace
    Count {
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: String,
    },

    /// Drop content fingerprints whose metadata has expired
    Reconcile,

    /// Delete every URL claim in a namespace
    Reset {
        #[arg(short, long, env = "CRAWLGUARD_NAMESPACE")]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("crawlguard=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            input,
            namespace,
            memory,
        } => {
            let namespace = namespace.unwrap_or_else(|| format!("replay-{}", Uuid::new_v4()));
            if memory {
                cmd_ingest(&input, &namespace, MemoryStore::new()).await?;
            } else {
                cmd_ingest(&input, &namespace, connect_store().await?).await?;
            }
        }
        Commands::Validate {
            title,
            url,
            text,
            text_file,
        } => {
            let text = match (text, text_file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read text file: {}", path.display()))?,
                (None, None) => bail!("either --text or --text-file is required"),
            };
            cmd_validate(&title, &url, &text)?;
        }
        Commands::Claim {
            namespace,
            url,
            ttl_secs,
        } => {
            let dedup = dedup_store().await?;
            let ttl = ttl_secs.map(std::time::Duration::from_secs);
            let claimed = dedup.claim_url(&namespace, &url, ttl).await?;
            print_json(&serde_json::json!({ "namespace": namespace, "url": url, "claimed": claimed }))?;
        }
        Commands::Unclaim { namespace, url } => {
            let dedup = dedup_store().await?;
            let released = dedup.unclaim(&namespace, &url).await?;
            print_json(&serde_json::json!({ "namespace": namespace, "url": url, "released": released }))?;
        }
        Commands::Status { namespace, url } => {
            let dedup = dedup_store().await?;
            let processed = dedup.is_processed(&namespace, &url).await?;
            print_json(&serde_json::json!({ "namespace": namespace, "url": url, "processed": processed }))?;
        }
        Commands::List { namespace } => {
            let dedup = dedup_store().await?;
            let mut urls: Vec<String> = dedup.list_processed(&namespace).await?.into_iter().collect();
            urls.sort();
            for url in urls {
                println!("{url}");
            }
        }
        Commands::Count { namespace } => {
            let dedup = dedup_store().await?;
            cmd_count(&dedup, &namespace).await?;
        }
        Commands::Reconcile => {
            let dedup = dedup_store().await?;
            let report = dedup.reconcile().await?;
            let remaining = dedup.content_hash_count().await?;
            print_json(&serde_json::json!({
                "scanned": report.scanned,
                "removed": report.removed,
                "remaining": remaining,
            }))?;
        }
        Commands::Reset { namespace } => {
            let dedup = dedup_store().await?;
            let removed = dedup.clear_namespace(&namespace).await?;
            print_json(&serde_json::json!({ "namespace": namespace, "removed": removed }))?;
        }
    }

    Ok(())
}

/// Connect to Redis using REDIS_URL.
async fn connect_store() -> Result<RedisStore> {
    let config = RedisConfig::from_env()?;
    RedisStore::connect(&config)
        .await
        .context("Failed to connect to Redis")
}

async fn dedup_store() -> Result<DeduplicationStore<RedisStore>> {
    Ok(DeduplicationStore::new(
        connect_store().await?,
        DedupConfig::from_env()?,
    ))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Debug, Default)]
struct IngestSummary {
    accepted: usize,
    rejected: usize,
    already_claimed: usize,
    failed: usize,
}

async fn cmd_ingest<S: KeyValueStore>(input: &Path, namespace: &str, store: S) -> Result<()> {
    let articles = load_articles(input)?;
    let urls: Vec<String> = articles.iter().map(|a| a.url.clone()).collect();
    tracing::info!(count = urls.len(), %namespace, "Loaded articles for replay");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current article");
            ctrl_c.cancel();
        }
    });

    let policy = RetryPolicy::from_env()?;
    let executor = RetryExecutor::new("replay-fetch", policy).with_cancellation(cancel.clone());
    let service = IngestService::new(
        ReplayFetcher::new(articles),
        DeduplicationStore::new(store, DedupConfig::from_env()?),
        ContentIntegrityValidator::new(ValidationConfig::from_env()?),
        executor,
        namespace,
    );

    let reporter = TracingIngestReporter;
    let mut summary = IngestSummary::default();
    for url in &urls {
        if cancel.is_cancelled() {
            break;
        }
        match service.ingest(url, &reporter).await {
            Ok(IngestOutcome::Accepted(_)) => summary.accepted += 1,
            Ok(IngestOutcome::Rejected { .. }) => summary.rejected += 1,
            Ok(IngestOutcome::AlreadyClaimed) => summary.already_claimed += 1,
            Err(_) => summary.failed += 1,
        }
    }

    let cache = service.validator().duplicate_cache().stats();
    print_json(&serde_json::json!({
        "namespace": namespace,
        "total": urls.len(),
        "accepted": summary.accepted,
        "rejected": summary.rejected,
        "already_claimed": summary.already_claimed,
        "failed": summary.failed,
        "duplicate_cache_size": cache.size,
    }))
}

fn cmd_validate(title: &str, url: &str, text: &str) -> Result<()> {
    let validator = ContentIntegrityValidator::new(ValidationConfig::from_env()?);
    match validator.validate(title, url, text) {
        ValidationResult::Valid => {
            println!("valid");
            Ok(())
        }
        ValidationResult::Invalid { reason, field } => {
            bail!("rejected on {field}: {reason}")
        }
    }
}

async fn cmd_count<S: KeyValueStore>(dedup: &DeduplicationStore<S>, namespace: &str) -> Result<()> {
    use crawlguard_core::dedup::counters;

    let urls = dedup.count_processed(namespace).await?;
    let processed = dedup.counter(namespace, counters::PROCESSED).await?;
    let rejected = dedup.counter(namespace, counters::REJECTED).await?;
    let duplicates = dedup.counter(namespace, counters::DUPLICATES).await?;
    print_json(&serde_json::json!({
        "namespace": namespace,
        "urls": urls,
        "processed": processed,
        "rejected": rejected,
        "duplicates": duplicates,
    }))
}
