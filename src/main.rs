//! Binary entrypoint for the Gridrealm CLI.
//!
//! Commands:
//! - `start [--listen <addr>]` - run the game with the TCP line transport
//! - `init` - create a starter `config.toml` and `content.json`
//! - `status` - print a summary of the content and the store
//! - `check-content [path]` - validate a content file and report counts
//!
//! See the library crate docs for module-level details: `gridrealm::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::sync::Arc;

use gridrealm::config::Config;
use gridrealm::game::content::Content;
use gridrealm::server::{tcp, ChannelTransport, GameServer, Router};
use gridrealm::storage::{Persistence, SledStore};

#[derive(Parser)]
#[command(name = "gridrealm")]
#[command(about = "A persistent multiplayer text world on a map grid")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the game server
    Start {
        /// Listen address, overriding `server.listen_addr`
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Write a default configuration and starter content
    Init,
    /// Show content and store statistics
    Status,
    /// Validate a content file
    CheckContent {
        /// Content file; defaults to the configured content path
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start { listen } => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let config = Arc::new(config);
            info!("Starting Gridrealm v{}", env!("CARGO_PKG_VERSION"));

            let content_path = config.storage.content_path();
            let content = Content::load(&content_path)
                .await
                .with_context(|| format!("failed to load content from {}", content_path.display()))?;
            let store = Arc::new(SledStore::open(config.storage.db_path())?);
            let transport = Arc::new(ChannelTransport::new());
            let router = Arc::new(Router::new(transport.clone()));
            let server = Arc::new(GameServer::new(config.clone(), content, router, store).await?);

            let addr = listen.unwrap_or_else(|| config.server.listen_addr.clone());
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {}", addr))?;
            let acceptor = tokio::spawn(tcp::serve(listener, server.clone(), transport));

            server
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("ctrl-c handler failed: {}", e);
                    }
                })
                .await?;
            acceptor.abort();
        }
        Commands::Init => {
            info!("Initializing new Gridrealm configuration");
            let cfg = Config::default();
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);

            tokio::fs::create_dir_all(&cfg.storage.data_dir).await?;
            let content_path = cfg.storage.content_path();
            if content_path.exists() {
                warn!("{} already exists, leaving it alone", content_path.display());
            } else {
                let json = Content::starter().to_json_pretty()?;
                tokio::fs::write(&content_path, json).await?;
                info!("Starter content written to {}", content_path.display());
            }
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let content = Content::load(config.storage.content_path()).await?;
            let store = SledStore::open(config.storage.db_path())
                .context("failed to open the store (is the server running?)")?;
            let characters = store.list_character_ids()?.len();
            let factions = store.load_factions()?;
            println!("{}", config.server.name);
            println!(
                "  content: {} maps, {} items, {} npcs, {} shops",
                content.maps.len(),
                content.items.len(),
                content.npcs.len(),
                content.shops.len()
            );
            println!("  store: {} characters, {} factions", characters, factions.len());
            for f in factions {
                println!("    [{}] {} ({} members)", f.tag, f.name, f.members.len());
            }
            match store.load_metrics()? {
                Some(record) => {
                    let m = record.snapshot;
                    println!(
                        "  counters (as of {}): commands={} kills={} deaths={} autosaves={} persistence_failures={}",
                        record.recorded_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        m.commands_dispatched,
                        m.npc_kills,
                        m.player_deaths,
                        m.autosaves,
                        m.persistence_failures
                    );
                }
                None => println!("  counters: none recorded yet"),
            }
        }
        Commands::CheckContent { path } => {
            let path = match path {
                Some(p) => std::path::PathBuf::from(p),
                None => match pre_config {
                    Some(c) => c.storage.content_path(),
                    None => Config::default().storage.content_path(),
                },
            };
            match Content::load(&path).await {
                Ok(content) => {
                    println!(
                        "{}: ok ({} maps, {} items, {} npcs, {} shops, {} loot tables)",
                        path.display(),
                        content.maps.len(),
                        content.items.len(),
                        content.npcs.len(),
                        content.shops.len(),
                        content.loot_tables.len()
                    );
                }
                Err(e) => {
                    eprintln!("{}: {}", path.display(), e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.clone())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    if let Some(f) = file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only in the foreground
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
