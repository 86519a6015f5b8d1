//! Dirpool - pooled, TLS-validated directory connections
//!
//! Command-line driver that opens a pool against a directory server and runs
//! lookups and attribute updates through it.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dirpool_core::DirpoolConfig;
use dirpool_directory::DirectoryPool;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "dirpool")]
#[command(author = "Dirpool Team")]
#[command(version = dirpool_core::VERSION)]
#[command(about = "Pooled, TLS-validated directory connections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory server host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Directory server port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Service account DN
    #[arg(long, global = true)]
    bind_dn: Option<String>,

    /// Trust store path
    #[arg(long, global = true)]
    trust_store: Option<String>,

    /// Pool capacity
    #[arg(long, global = true)]
    capacity: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add, read, replace, read and delete `description` on one user
    Scenario {
        /// Username matched against the lookup attribute
        username: String,

        /// Search base
        #[arg(long, default_value = "dc=example,dc=com")]
        base_dn: String,

        /// Attribute exercised by the scenario
        #[arg(long, default_value = "description")]
        attribute: String,
    },

    /// Resolve a username to its DN
    Lookup {
        username: String,

        #[arg(long, default_value = "dc=example,dc=com")]
        base_dn: String,
    },

    /// Replace attributes on an entry, given as name=value pairs
    Update {
        dn: String,

        #[arg(required = true)]
        attributes: Vec<String>,
    },

    /// Show the server's root DSE
    RootDse,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Load or create config
    let mut config = if let Some(config_path) = &cli.config {
        // Environment variables take precedence over the file
        let mut config = DirpoolConfig::from_file(config_path)?;
        config.apply_env();
        config
    } else {
        DirpoolConfig::from_env()
    };

    // Override with CLI args
    if let Some(host) = cli.host {
        config.directory.host = host;
    }
    if let Some(port) = cli.port {
        config.directory.port = port;
    }
    if let Some(bind_dn) = cli.bind_dn {
        config.directory.bind_dn = bind_dn;
    }
    if let Some(trust_store) = cli.trust_store {
        config.trust.store_path = trust_store.into();
    }
    if let Some(capacity) = cli.capacity {
        config.pool.capacity = capacity;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    init_logging(&config);

    match cli.command {
        Some(Commands::Version) | None => {
            println!("dirpool {}", dirpool_core::VERSION);
        }
        Some(Commands::Scenario {
            username,
            base_dn,
            attribute,
        }) => {
            let pool = open(&config).await?;
            let outcome = run_scenario(&pool, &username, &base_dn, &attribute).await;
            pool.shutdown().await?;
            outcome?;
        }
        Some(Commands::Lookup { username, base_dn }) => {
            let pool = open(&config).await?;
            let mut conn = pool.borrow().await?;
            let outcome = pool.lookup_user_dn(&mut conn, &username, &base_dn).await;
            pool.release(conn).await;
            pool.shutdown().await?;
            println!("{}", outcome?);
        }
        Some(Commands::Update { dn, attributes }) => {
            let pairs = parse_pairs(&attributes)?;
            let pool = open(&config).await?;
            let mut conn = pool.borrow().await?;
            let outcome = pool.apply_batch(&mut conn, &dn, pairs).await;
            pool.release(conn).await;
            pool.shutdown().await?;
            for attribute in outcome? {
                println!("replaced {}", attribute);
            }
        }
        Some(Commands::RootDse) => {
            let pool = open(&config).await?;
            let mut conn = pool.borrow().await?;
            let outcome = pool.root_dse(&mut conn).await;
            pool.release(conn).await;
            pool.shutdown().await?;
            println!("{}", serde_json::to_string_pretty(&outcome?)?);
        }
    }

    Ok(())
}

fn init_logging(config: &DirpoolConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

async fn open(config: &DirpoolConfig) -> anyhow::Result<DirectoryPool> {
    info!(
        "Opening pool: {} as {} (capacity {})",
        config.directory.url(),
        config.directory.bind_dn,
        config.pool.capacity
    );

    let pool = DirectoryPool::open(config)
        .await
        .with_context(|| format!("Failed to open pool to {}", config.directory.url()))?;
    Ok(pool)
}

/// Add, read, replace, read and delete one attribute, printing each read.
async fn run_scenario(
    pool: &DirectoryPool,
    username: &str,
    base_dn: &str,
    attribute: &str,
) -> anyhow::Result<()> {
    let mut conn = pool.borrow().await?;

    let outcome = async {
        let dn = pool.lookup_user_dn(&mut conn, username, base_dn).await?;
        println!("{} -> {}", username, dn);

        pool.add_attribute(&mut conn, &dn, attribute, "X").await?;
        print_values(attribute, pool.read_attribute(&mut conn, &dn, attribute).await?);

        pool.replace_attribute(&mut conn, &dn, attribute, "Y").await?;
        print_values(attribute, pool.read_attribute(&mut conn, &dn, attribute).await?);

        pool.delete_attribute(&mut conn, &dn, attribute).await?;
        print_values(attribute, pool.read_attribute(&mut conn, &dn, attribute).await?);

        anyhow::Ok(())
    }
    .await;

    pool.release(conn).await;
    outcome
}

fn print_values(attribute: &str, values: Option<Vec<String>>) {
    match values {
        Some(values) => println!("{}: {}", attribute, values.join(", ")),
        None => println!("{}: <absent>", attribute),
    }
}

fn parse_pairs(pairs: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
            _ => anyhow::bail!("expected name=value, got '{}'", pair),
        })
        .collect()
}
