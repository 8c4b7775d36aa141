//! Coordinator daemon: admits CTXs over TCP, batches them, and drives
//! distributed commits across the shards named in its config file.
//!
//! Usage: `coordinatord <config.toml> <node-id> <listen-addr>`

use clap::Parser;
use settlement_api::{RemoteShardClient, SentinelHandler, TcpServer};
use settlement_cli::{DaemonConfig, StopToken};
use settlement_core::traits::{AcceptAllVerifier, SignatureVerifier};
use settlement_engine::{CoordinatorConfig, CoordinatorController, ShardClient, VerifyFn};
use settlement_executor::CoordinatorRunner;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
struct Args {
    /// Path to the deployment's TOML config file.
    config: PathBuf,
    /// This node's leadership term on startup. A real deployment derives
    /// this from its external election component; a fresh single-node
    /// startup uses 1.
    #[arg(default_value_t = 1)]
    term: u64,
    /// Address to listen on for sentinel admission requests.
    #[arg(long, default_value = "0.0.0.0:7000")]
    listen: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!(error = %e, "coordinatord exiting on startup error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = DaemonConfig::from_file(&args.config)?;
    let sentinel_keys = config.sentinel_keys()?;
    let durability = config.durability_mode()?;

    let mut shards: Vec<Arc<dyn ShardClient>> = Vec::with_capacity(config.shard_ranges.len());
    for endpoint in &config.shard_ranges {
        let client = RemoteShardClient::connect(&endpoint.addr, endpoint.range(), Duration::from_secs(5))?;
        shards.push(Arc::new(client));
    }

    let verifier = AcceptAllVerifier;
    let verify: VerifyFn = Box::new(move |attestation, ctx_id| verifier.verify(attestation, ctx_id));

    let controller = Arc::new(CoordinatorController::open(
        &args.config.with_extension("log"),
        durability,
        CoordinatorConfig {
            batch_size: config.batch_size,
            window_size: config.window_size,
            attestation_threshold: config.attestation_threshold,
            sentinel_keys,
        },
        verify,
        shards,
    )?);

    let runner = CoordinatorRunner::start(Arc::clone(&controller), args.term, config.batch_workers)?;
    let handler = Arc::new(SentinelHandler::new(controller));
    let server = TcpServer::bind(&args.listen, handler)?;
    tracing::info!(addr = %server.local_addr(), "coordinatord listening");

    let stop = StopToken::install()?;
    stop.wait(Duration::from_millis(200));

    tracing::info!("SIGINT received, shutting down");
    server.shutdown();
    runner.stop(None);
    Ok(())
}
