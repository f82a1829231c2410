//! Client Resilience CLI
//!
//! Operates a resilience layer from the shell: issue requests through the
//! retrying client, manage the session, inspect and drain the offline queue,
//! and maintain the cache.
//!
//! ```text
//! client-resilience --base-url https://api.example.com sign-in --access A --refresh R
//! client-resilience post /chat/messages --data '{"text":"hello"}'
//! client-resilience queue-stats
//! client-resilience drain
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use client_resilience::{
    CacheEngine, CredentialStore, Database, Error, HttpMethod, MasterKey, OperationKind,
    PendingOperation, ResilienceConfig, ResilienceLayer, Result, WriteOutcome,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Client Resilience - tiered cache, retrying client and offline write queue
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "RESILIENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the upstream API
    #[arg(long, env = "RESILIENCE_BASE_URL")]
    base_url: Option<String>,

    /// Directory for the local cache, database and credential file
    #[arg(long, env = "RESILIENCE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// GET a path and print the body
    Get {
        path: String,
        /// Serve from and populate the cache
        #[arg(long)]
        cached: bool,
    },

    /// POST a JSON body, queueing it if the server is unreachable
    Post {
        path: String,
        /// JSON request body
        #[arg(long)]
        data: String,
    },

    /// Store access and refresh tokens
    SignIn {
        #[arg(long)]
        access: String,
        #[arg(long)]
        refresh: String,
    },

    /// Remove credentials and the cache namespace
    SignOut,

    /// Deliver pending offline operations
    Drain,

    /// Print offline queue counters
    QueueStats,

    /// Print cache tier occupancy and counters
    CacheStats,

    /// Run one cache expiry sweep
    Cleanup,

    /// Print metrics in the Prometheus text format
    Metrics,

    /// Print a fresh hex-encoded credential master key
    GenerateKey,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    if let Command::GenerateKey = args.command {
        println!("{}", MasterKey::generate().to_hex());
        return Ok(());
    }

    let config = load_config(&args)?;
    info!(
        version = client_resilience::VERSION,
        base_url = %config.http.base_url,
        data_dir = %config.resolved_data_dir().display(),
        "Starting client resilience CLI"
    );

    let credentials = CredentialStore::open(&config)?;
    let db = Database::open(config.database_path())?;
    let cache = CacheEngine::open(&config, db.clone()).await?;
    let layer = ResilienceLayer::from_parts(config, credentials, cache, db).await?;

    let result = run(&layer, args.command).await;
    layer.shutdown().await;
    result
}

async fn run(layer: &ResilienceLayer, command: Command) -> Result<()> {
    match command {
        Command::Get { path, cached } => {
            if cached {
                let value: serde_json::Value = layer.fetch(&path, None).await?;
                print_json(&value)?;
            } else {
                let response = layer.http_get(&path).await?;
                println!("{}", response.text()?);
            }
        }
        Command::Post { path, data } => {
            let body: serde_json::Value = serde_json::from_str(&data)?;
            let op = PendingOperation::new(
                OperationKind::Other("cli".to_string()),
                HttpMethod::Post,
                path,
                body,
            );
            match layer.submit(op).await? {
                WriteOutcome::Delivered(response) => {
                    println!("delivered ({})", response.status);
                    if !response.body.is_empty() {
                        println!("{}", response.text()?);
                    }
                }
                WriteOutcome::QueuedOffline(op) => {
                    println!("queued offline as {}; it will sync when online", op.id);
                }
            }
        }
        Command::SignIn { access, refresh } => {
            layer.sign_in(&access, &refresh, None).await?;
            println!("signed in");
        }
        Command::SignOut => {
            layer.sign_out().await?;
            println!("signed out");
        }
        Command::Drain => print_json(&layer.drain().await?)?,
        Command::QueueStats => print_json(&layer.queue_stats().await?)?,
        Command::CacheStats => print_json(&layer.cache_stats().await)?,
        Command::Cleanup => print_json(&layer.cleanup().await)?,
        Command::Metrics => print!("{}", layer.metrics()?),
        Command::GenerateKey => println!("{}", MasterKey::generate().to_hex()),
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<ResilienceConfig> {
    let mut config = match &args.config {
        Some(path) => ResilienceConfig::load(path)?,
        None => ResilienceConfig::default(),
    };

    if let Some(base_url) = &args.base_url {
        config.http.base_url = base_url.clone();
    }
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = Some(data_dir.clone());
    }

    config.validate()?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(Error::from)?;
    println!("{}", rendered);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "hyper_util=warn", "reqwest=info", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Logs go to stderr so command output stays pipeable
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
