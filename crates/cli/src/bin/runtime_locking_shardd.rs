//! Runtime locking shard daemon: serves the wound-wait lock manager's
//! broker-facing RPCs over TCP, backed by a replicated log of
//! `prepare`/`commit`/`finish` records.
//!
//! Usage: `runtime-locking-shardd <config.toml> <shard-index> <listen-addr>`

use clap::Parser;
use settlement_api::{RuntimeLockingShardHandler, TcpServer};
use settlement_cli::{DaemonConfig, StopToken};
use settlement_engine::RuntimeLockingShardController;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
struct Args {
    /// Path to the deployment's TOML config file.
    config: PathBuf,
    /// Index into `shard_ranges` naming this process's on-disk log path
    /// and listen address.
    shard_index: usize,
    /// This node's leadership term on startup, same convention as
    /// `coordinatord`.
    #[arg(default_value_t = 1)]
    term: u64,
    /// Address to listen on, overriding the config entry's `addr` if set.
    #[arg(long)]
    listen: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "runtime-locking-shardd exiting on startup error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_file(&args.config)?;
    let durability = config.durability_mode()?;
    let endpoint = config
        .shard_ranges
        .get(args.shard_index)
        .ok_or_else(|| format!("config has no shard_ranges[{}]", args.shard_index))?;
    let listen = args.listen.clone().unwrap_or_else(|| endpoint.addr.clone());

    let log_path = args
        .config
        .with_file_name(format!("runtime-locking-shard-{}.log", args.shard_index));
    let controller = Arc::new(RuntimeLockingShardController::open(&log_path, durability)?);
    controller.become_leader(args.term)?;

    let handler = Arc::new(RuntimeLockingShardHandler::new(Arc::clone(&controller)));
    let server = TcpServer::bind(&listen, handler)?;
    tracing::info!(addr = %server.local_addr(), "runtime-locking-shardd listening");

    let stop = StopToken::install()?;
    stop.wait(Duration::from_millis(200));

    tracing::info!("SIGINT received, shutting down");
    server.shutdown();
    controller.become_follower(None);
    Ok(())
}
