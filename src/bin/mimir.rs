//! mimir — operator CLI.
//!
//! Resolves requests against the configured backends and inspects the
//! durable store. Backends without a configured URL fall back to
//! in-process implementations, which only live as long as the command.

use std::io::{self, IsTerminal, Read, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mimir::config::{Config, Secrets};
use mimir::{
    CapacityFilter, Category, DurableStore, LeaseLock, LlmGenerator, MemoryLeaseLock,
    MemorySharedTier, MemoryStore, RequesterId, ResolveEvent, ResolveRequest, Resolver,
    SharedTier, TieredCache,
};

/// Generate-once lookup pipeline for LLM answers.
#[derive(Parser)]
#[command(name = "mimir")]
#[command(version = mimir::PKG_VERSION)]
#[command(about = "Generate-once lookup pipeline for LLM answers")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "MIMIR_CONFIG")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve text to an answer, generating it if no tier has one
    Resolve {
        /// Text to resolve (or omit to read from stdin)
        text: Option<String>,
        /// Answer category: code or article
        #[arg(short, long, default_value = "code")]
        category: Category,
        /// Requester recorded in access history
        #[arg(short, long, default_value_t = 0)]
        requester: RequesterId,
        /// Print fragments as they are generated
        #[arg(short, long)]
        stream: bool,
    },

    /// Show a requester's most recent answers
    History {
        requester: RequesterId,
        #[arg(short, long, default_value_t = mimir::store::DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },

    /// Drop a cached answer from the shared tier
    Invalidate {
        /// Text whose answer to drop (or omit to read from stdin)
        text: Option<String>,
        #[arg(short, long, default_value = "code")]
        category: Category,
    },

    /// Load the capacity filter from the store and print its sizing
    FilterStats,

    /// Create the durable store tables if missing
    Bootstrap,

    /// Print build version
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Command::Version = args.command {
        println!("mimir {}", mimir::version_string());
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;
    let backends = Backends::connect(&config).await?;
    info!(version = mimir::version_string(), "mimir starting");

    match args.command {
        Command::Resolve {
            text,
            category,
            requester,
            stream,
        } => {
            let text = resolve_text(text, "resolve")?;
            let secrets = Secrets::load()?;
            let generator = LlmGenerator::new(config.generator_config(secrets.api_key()))?;

            let resolver = Resolver::builder()
                .generator(Arc::new(generator))
                .shared_tier(backends.shared)
                .store(backends.store)
                .lease_lock(backends.lock)
                .cache_config(config.cache_config())
                .filter_config(config.filter_config())
                .lock_config(config.lock_config())
                .retry(config.retry_config())
                .warmup(mimir::WarmupConfig::disabled())
                .without_maintenance()
                .build()
                .await?;

            let request = ResolveRequest::new(requester, category, text);
            if stream {
                let mut events = resolver.resolve_stream(request);
                let mut stdout = io::stdout();
                while let Some(event) = events.next().await {
                    match event? {
                        ResolveEvent::Text(chunk) => {
                            write!(stdout, "{chunk}")?;
                            stdout.flush()?;
                        }
                        ResolveEvent::Done { key, source } => {
                            writeln!(stdout)?;
                            eprintln!("source: {source}  key: {key}");
                        }
                    }
                }
            } else {
                let resolution = resolver.resolve(request).await?;
                println!("{}", resolution.text());
                eprintln!(
                    "source: {}  key: {}",
                    resolution.source, resolution.payload.key
                );
            }
            resolver.shutdown().await;
        }

        Command::History { requester, limit } => {
            let payloads = backends.store.recent_history(requester, limit).await?;
            if payloads.is_empty() {
                println!("no history for requester {requester}");
            }
            for payload in payloads {
                let preview: String = payload.text.chars().take(72).collect();
                println!(
                    "{}  {:<7}  {}  {}",
                    payload.created_at.format("%Y-%m-%d %H:%M:%S"),
                    payload.category,
                    &payload.key.as_str()[..12],
                    preview.replace('\n', " ")
                );
            }
        }

        Command::Invalidate { text, category } => {
            let text = resolve_text(text, "invalidate")?;
            let cache = TieredCache::new(backends.shared, config.cache_config());
            let key = mimir::ContentKey::derive(category, &text);
            cache.delete(&key).await?;
            println!("invalidated {key}");
        }

        Command::FilterStats => {
            let filter = CapacityFilter::load(backends.store, config.filter_config()).await?;
            println!("{}", serde_json::to_string_pretty(&filter.stats())?);
        }

        Command::Bootstrap => bootstrap(&config).await?,

        Command::Version => unreachable!("handled above"),
    }

    Ok(())
}

/// Backends selected by configuration.
struct Backends {
    store: Arc<dyn DurableStore>,
    shared: Arc<dyn SharedTier>,
    lock: Arc<dyn LeaseLock>,
}

impl Backends {
    async fn connect(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let (shared, lock): (Arc<dyn SharedTier>, Arc<dyn LeaseLock>) = match config.redis.url {
            #[cfg(feature = "redis")]
            Some(ref url) => (
                Arc::new(mimir::RedisSharedTier::connect(url).await?),
                Arc::new(mimir::RedisLeaseLock::connect(url).await?),
            ),
            #[cfg(not(feature = "redis"))]
            Some(_) => return Err("redis.url is set but mimir was built without redis".into()),
            None => {
                warn!("no redis.url configured, using in-process shared tier and lease lock");
                (
                    Arc::new(MemorySharedTier::new()),
                    Arc::new(MemoryLeaseLock::new()),
                )
            }
        };

        let store: Arc<dyn DurableStore> = match config.database.url {
            #[cfg(feature = "postgres")]
            Some(ref url) => Arc::new(
                mimir::PgStore::connect(url, config.database.max_connections).await?,
            ),
            #[cfg(not(feature = "postgres"))]
            Some(_) => {
                return Err("database.url is set but mimir was built without postgres".into());
            }
            None => {
                warn!("no database.url configured, using in-process store");
                Arc::new(MemoryStore::new())
            }
        };

        Ok(Self {
            store,
            shared,
            lock,
        })
    }
}

#[cfg(feature = "postgres")]
async fn bootstrap(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let Some(ref url) = config.database.url else {
        return Err("bootstrap: database.url is not configured".into());
    };
    let store = mimir::PgStore::connect(url, 1).await?;
    store.bootstrap().await?;
    println!("durable store ready");
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn bootstrap(_config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    Err("bootstrap: mimir was built without postgres".into())
}

/// Resolve text input from an optional CLI argument and/or stdin.
///
/// - arg only → arg
/// - stdin only → stdin
/// - both → `"{arg}\n\n{stdin}"`
/// - neither → error
fn resolve_text(arg: Option<String>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    let stdin_text = if io::stdin().is_terminal() {
        None
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        let trimmed = buf.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };

    match (arg, stdin_text) {
        (Some(a), Some(s)) => Ok(format!("{a}\n\n{s}")),
        (Some(a), None) => Ok(a),
        (None, Some(s)) => Ok(s),
        (None, None) => {
            Err(format!("{command}: no input provided (pass text as argument or via stdin)").into())
        }
    }
}
