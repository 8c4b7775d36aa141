//! UHS locking shard daemon: serves `lock_outputs`/`apply_outputs`/
//! `discard_dtx`/`check_unspent`/`check_tx_id` over TCP against an
//! in-memory shard. No replicated log sits underneath a plain shard: per
//! the component design, shard UHS durability is out of scope for the
//! core, so this binary holds no on-disk state across restarts.
//!
//! Usage: `shardd <config.toml> <shard-index> <listen-addr>`

use clap::Parser;
use settlement_api::{ShardHandler, TcpServer};
use settlement_cli::{DaemonConfig, StopToken};
use settlement_storage::ShardState;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
struct Args {
    /// Path to the deployment's TOML config file.
    config: PathBuf,
    /// Index into `shard_ranges` naming which range this process owns.
    shard_index: usize,
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
            tracing::error!(error = %e, "shardd exiting on startup error");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_file(&args.config)?;
    let endpoint = config
        .shard_ranges
        .get(args.shard_index)
        .ok_or_else(|| format!("config has no shard_ranges[{}]", args.shard_index))?;
    let listen = args.listen.unwrap_or_else(|| endpoint.addr.clone());

    let shard = Arc::new(ShardState::new(endpoint.range(), config.completed_txs_cache_size));
    let handler = Arc::new(ShardHandler::new(shard));
    let server = TcpServer::bind(&listen, handler)?;
    tracing::info!(addr = %server.local_addr(), range = ?endpoint.range(), "shardd listening");

    let stop = StopToken::install()?;
    stop.wait(Duration::from_millis(200));

    tracing::info!("SIGINT received, shutting down");
    server.shutdown();
    Ok(())
}
