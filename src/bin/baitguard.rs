//! Baitguard CLI: run the classification pipeline against a local cache.
//!
//! Usage:
//!   baitguard classify <TEXT>... [--config path] [--db path]
//!   baitguard summarize <URL>...
//!   baitguard stats
//!   baitguard clear

use baitguard::{
    Config, LinkId, OpenStore, PageSession, ServiceHost, SessionError, SqliteStore,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "baitguard",
    version,
    about = "Clickbait link classification and summaries"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite cache database
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify link texts
    Classify {
        #[arg(required = true)]
        texts: Vec<String>,
    },
    /// Fetch and summarize articles
    Summarize {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Show cached record counts
    Stats,
    /// Remove every cached record
    Clear,
}

/// Get the default database path (~/.local/share/baitguard/cache.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("baitguard").join("cache.db")
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("baitguard=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load(path).map_err(|e| format!("{}: {}", path.display(), e)),
        None => Ok(Config::default()),
    }
}

fn print_json(value: &impl Serialize) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn report<T: Serialize>(result: Result<T, SessionError>) -> i32 {
    match result {
        Ok(value) => print_json(&value),
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

async fn cmd_classify(session: &PageSession, texts: Vec<String>) -> i32 {
    let links = texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| (LinkId::new(i.to_string()), text))
        .collect();
    let result = session.classify_links(links).await.map(|results| {
        results
            .into_iter()
            .map(|(_, outcome)| outcome)
            .collect::<Vec<_>>()
    });
    report(result)
}

async fn cmd_clear(session: &PageSession) -> i32 {
    report(
        session
            .clear_cache()
            .await
            .map(|cleared| serde_json::json!({ "cleared": cleared })),
    )
}

fn run(cli: Cli) -> i32 {
    let Cli {
        command,
        config,
        db,
    } = cli;
    let config = match load_config(config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    let db_path = db.unwrap_or_else(default_db_path);
    let store = match SqliteStore::open(&db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("Error: failed to open database at {}: {}", db_path.display(), e);
            return 1;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let host = ServiceHost::new(config.services(store), config.host.clone());
        let session = PageSession::connect(&host, &config);
        match command {
            Commands::Classify { texts } => cmd_classify(&session, texts).await,
            Commands::Summarize { urls } => report(session.summarize_urls(urls).await),
            Commands::Stats => report(session.stats().await),
            Commands::Clear => cmd_clear(&session).await,
        }
    })
}

fn main() {
    init_logging();
    let cli = Cli::parse();
    std::process::exit(run(cli));
}
