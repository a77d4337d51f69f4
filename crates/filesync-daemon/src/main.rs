//! filesync-daemon: keeps text files on disk in agreement with their CRDT documents.
//!
//! Runs a reconciliation pass per configured file on a fixed interval, using
//! the native filesystem, a JSON last-write cache and Loro snapshots on disk.

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use filesync_daemon::{Args, Config, Daemon};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,filesync_daemon=debug,filesync_core=debug"
    } else {
        "info,filesync_daemon=info,filesync_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::from_args(args)?;

    info!("Starting filesync-daemon");
    info!("Directory: {:?}", config.dir);
    info!("State directory: {:?}", config.state_dir);

    let daemon = Daemon::open(config).await?;
    daemon.run().await
}
