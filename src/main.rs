use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use relay_server::ServerConfig;
use relay_store::Database;
use relay_telemetry::{LogFormat, TelemetryConfig};

/// Real-time lobby chat relay over WebSocket.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, env = "RELAY_PORT", default_value_t = 8080)]
    port: u16,

    /// SQLite database file [default: $HOME/.relay/relay.db]
    #[arg(long, env = "RELAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Keep everything in memory; nothing survives a restart
    #[arg(long, conflicts_with = "db_path")]
    in_memory: bool,

    /// Log output format: pretty or json
    #[arg(long, env = "RELAY_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Base log level; RUST_LOG takes precedence
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Outbound frames queued per connection before it is evicted
    #[arg(long, env = "RELAY_MAX_SEND_QUEUE", default_value_t = 256)]
    max_send_queue: usize,

    /// Seconds between heartbeat pings
    #[arg(long, env = "RELAY_HEARTBEAT_SECS", default_value_t = 30)]
    heartbeat_secs: u64,

    /// Seconds without a pong before a connection is closed
    #[arg(long, env = "RELAY_CLIENT_TIMEOUT_SECS", default_value_t = 90)]
    client_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let _telemetry = relay_telemetry::init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        format: args.log_format,
        ..Default::default()
    })
    .context("failed to initialize logging")?;

    tracing::info!("starting relay");

    let db = open_database(&args)?;

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        max_send_queue: args.max_send_queue,
        heartbeat_interval_secs: args.heartbeat_secs,
        client_timeout_secs: args.client_timeout_secs,
    };
    let handle = relay_server::start(config, db)
        .await
        .context("failed to start server")?;

    tracing::info!(addr = %handle.local_addr, "relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    handle.shutdown().await;
    tracing::info!("stopped");
    Ok(())
}

fn open_database(args: &Args) -> anyhow::Result<Database> {
    if args.in_memory {
        tracing::warn!("using in-memory database");
        return Database::in_memory().context("failed to open in-memory database");
    }

    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| dirs_home().join(".relay").join("relay.db"));
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");
    Ok(db)
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
