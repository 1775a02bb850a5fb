//! Command line interface for operating the webhook bridge. Supports
//! initialization, serving the HTTP endpoints, and managing the NIP-05
//! directory and supporter allow-list by hand.

mod audit;
mod claim;
mod config;
mod dispatch;
mod event;
mod extract;
mod registry;
mod server;
mod store;

use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand};

use config::Settings;
use dispatch::Dispatcher;
use registry::{AddOutcome, NameDirectory, SupporterSet};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "kofr",
    author,
    version,
    about = "Ko-fi webhook bridge for a file-backed Nostr deployment"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Create the data directories and a default `.env` file.
    Init,
    /// Launch the webhook HTTP service.
    Serve,
    /// Manage the NIP-05 handle directory.
    Names {
        #[command(subcommand)]
        action: NamesAction,
    },
    /// Manage the relay supporter allow-list.
    Supporters {
        #[command(subcommand)]
        action: SupportersAction,
    },
}

/// Operations available under `kofr names`.
#[derive(Subcommand)]
enum NamesAction {
    /// Create or update a handle mapping.
    Add { handle: String, pubkey: String },
    /// Remove a handle mapping.
    Remove { handle: String },
    /// Print all mappings, sorted by handle.
    List,
}

/// Operations available under `kofr supporters`.
#[derive(Subcommand)]
enum SupportersAction {
    /// Add a supporter pubkey.
    Add { pubkey: String },
    /// Remove a supporter pubkey.
    Remove { pubkey: String },
    /// Print all supporter pubkeys.
    List,
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    match cli.command {
        Commands::Init => {
            init_store(&cfg)?;
        }
        Commands::Serve => {
            init_tracing();
            init_store(&cfg)?;
            let addr: SocketAddr = cfg.bind_http.as_str().parse()?;
            let dispatcher = Dispatcher::new(cfg);
            server::serve_http(addr, dispatcher, std::future::pending()).await?;
        }
        Commands::Names { action } => handle_names(&cfg, action)?,
        Commands::Supporters { action } => handle_supporters(&cfg, action)?,
    }
    Ok(())
}

/// Ensure the directories holding the managed files exist.
fn init_store(cfg: &Settings) -> anyhow::Result<()> {
    for path in [&cfg.names_file, &cfg.supporters_file, &cfg.audit_log] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}

fn handle_names(cfg: &Settings, action: NamesAction) -> anyhow::Result<()> {
    let names = NameDirectory::new(cfg.names_file.clone());
    match action {
        NamesAction::Add { handle, pubkey } => {
            let handle = registry::normalize_handle(&handle)?;
            let pubkey = registry::normalize_pubkey(&pubkey)?;
            match names.add(&handle, &pubkey)? {
                AddOutcome::Inserted => println!("stored handle '{handle}' -> {pubkey}"),
                AddOutcome::AlreadyPresent => {
                    println!("handle '{handle}' already maps to {pubkey}")
                }
            }
        }
        NamesAction::Remove { handle } => {
            let handle = registry::normalize_handle(&handle)?;
            if names.remove(&handle)? {
                println!("removed handle '{handle}'");
            } else {
                println!("handle '{handle}' not found; nothing to remove");
            }
        }
        NamesAction::List => {
            for (handle, pubkey) in names.list()? {
                println!("{handle} {pubkey}");
            }
        }
    }
    Ok(())
}

fn handle_supporters(cfg: &Settings, action: SupportersAction) -> anyhow::Result<()> {
    let supporters = SupporterSet::new(cfg.supporters_file.clone());
    match action {
        SupportersAction::Add { pubkey } => {
            let pubkey = registry::normalize_pubkey(&pubkey)?;
            match supporters.add(&pubkey)? {
                AddOutcome::Inserted => println!("supporter added {pubkey}"),
                AddOutcome::AlreadyPresent => println!("supporter already present {pubkey}"),
            }
        }
        SupportersAction::Remove { pubkey } => {
            let pubkey = registry::normalize_pubkey(&pubkey)?;
            if supporters.remove(&pubkey)? {
                println!("supporter removed {pubkey}");
            } else {
                println!("supporter {pubkey} not found; nothing to remove");
            }
        }
        SupportersAction::List => {
            for pubkey in supporters.list()? {
                println!("{pubkey}");
            }
        }
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("kofr-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:8787\n");
    content.push_str("# Blank path overrides fall back to STORE_ROOT defaults.\n");
    content.push_str("NAMES_FILE=\n");
    content.push_str("SUPPORTERS_FILE=\n");
    content.push_str("AUDIT_LOG=\n");
    content.push_str("# Blank token disables verification token checking.\n");
    content.push_str("KOFI_WEBHOOK_TOKEN=\n");
    content.push_str(&format!(
        "CLAIM_PRODUCT_CODES={}\n",
        config::DEFAULT_CLAIM_CODE
    ));
    content.push_str("SUPPORTER_PRODUCT_CODES=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

/// Install the fmt subscriber unless one is already set.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
