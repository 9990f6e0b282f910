//! Line-oriented host for the moderator engine
//!
//! Reads JSON commands from stdin, one per line, and answers each with a
//! JSON line on stdout. Spectator-safe engine events are echoed to stdout as
//! `{"event": ...}` lines. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Defaults, state under ./moderator-state
//! moderator-host
//!
//! # Config file plus overrides
//! MODERATOR_VOTE_SECS=30 moderator-host --config moderator.toml --night-secs 45
//!
//! # Only these rooms survive recovery
//! moderator-host --rooms lobby-1,lobby-2
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use moderator::events::{EventBusError, EventBusExt, FilteredReceiver};
use moderator::rooms::{AnyRoom, InMemoryRooms, RoomDirectory};
use moderator::{EngineConfig, EventFilter, SessionManager};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (overridden by MODERATOR_* variables and these flags)
    #[arg(long)]
    config: Option<PathBuf>,

    /// RocksDB state directory
    #[arg(long)]
    state_path: Option<PathBuf>,

    /// Window for each night step, in seconds
    #[arg(long)]
    night_secs: Option<u64>,

    #[arg(long)]
    deliberation_secs: Option<u64>,

    #[arg(long)]
    vote_secs: Option<u64>,

    /// Fixed RNG seed for reproducible deals
    #[arg(long)]
    seed: Option<u64>,

    /// Rooms that still exist; without it every stored room is resumed
    #[arg(long, value_delimiter = ',')]
    rooms: Option<Vec<String>>,

    /// Do not echo engine events
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    }
    .with_env()?;

    if let Some(path) = &args.state_path {
        config.state_path = path.clone();
    }
    if let Some(secs) = args.night_secs {
        config.night_secs = secs;
    }
    if let Some(secs) = args.deliberation_secs {
        config.deliberation_secs = secs;
    }
    if let Some(secs) = args.vote_secs {
        config.vote_secs = secs;
    }
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    Ok(config)
}

type Stdout = Arc<Mutex<tokio::io::Stdout>>;

async fn write_line(out: &Stdout, line: String) {
    let mut out = out.lock().await;
    let written = async {
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await
    }
    .await;
    if let Err(e) = written {
        warn!("Failed to write to stdout: {}", e);
    }
}

/// Echo spectator-safe events until the bus closes
async fn print_events(mut events: FilteredReceiver, out: Stdout) {
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&serde_json::json!({ "event": event })) {
                Ok(line) => write_line(&out, line).await,
                Err(e) => warn!("Failed to encode event: {}", e),
            },
            Err(EventBusError::Lagged(n)) => warn!(skipped = n, "Event printer lagged"),
            Err(EventBusError::ChannelClosed) => break,
        }
    }
}

async fn serve(manager: &SessionManager, out: Stdout) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = match commands::parse(line) {
            Ok(command) => commands::dispatch(manager, command).await,
            Err(response) => response,
        };
        let encoded = serde_json::to_string(&response).context("encoding response")?;
        write_line(&out, encoded).await;
    }
    info!("stdin closed");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moderator=info,moderator_host=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = build_config(&args)?;
    info!(state_path = %config.state_path.display(), "Starting moderator host");

    let rooms: Arc<dyn RoomDirectory> = match &args.rooms {
        Some(list) => Arc::new(InMemoryRooms::new(list.iter().cloned())),
        None => Arc::new(AnyRoom),
    };
    let manager = SessionManager::open(config, rooms)
        .map_err(|e| anyhow::anyhow!("Failed to open state store: {}", e))?;

    // Flush whatever RocksDB buffered if a task panics
    let store = manager.store().clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Err(e) = store.flush() {
            eprintln!("flush after panic failed: {}", e);
        }
        default_hook(info);
    }));

    let report = manager.recover().await?;
    info!(
        restored = report.restored.len(),
        discarded = report.discarded(),
        "Recovery complete"
    );
    for err in &report.inconsistent {
        warn!(code = err.code(), "{}", err);
    }

    let out: Stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    if !args.quiet {
        let events = manager.bus().subscribe_filtered(EventFilter::spectator());
        tokio::spawn(print_events(events, out.clone()));
    }

    tokio::select! {
        result = serve(&manager, out) => {
            if let Err(e) = result {
                error!("Command loop failed: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
        }
    }

    manager.shutdown().await?;
    Ok(())
}
