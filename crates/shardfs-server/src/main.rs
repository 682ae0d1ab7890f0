//! shardfs shard server binary
//!
//! Serves one shard of the namespace over Cap'n Proto RPC.
//!
//! ## Usage
//!
//! ```bash
//! shardfs-server --port 7071 --start-prefix a --end-prefix n
//! shardfs-server --port 7072 --start-prefix n --end-prefix '{'
//! ```

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use shardfs_kernel::ShardRange;
use shardfs_server::constants::{DEFAULT_BIND_ADDRESS, DEFAULT_PORT};
use shardfs_server::{ShardServer, ShardServerConfig};

#[derive(Parser, Debug)]
#[command(name = "shardfs-server", about = "Serve one shard of a shardfs namespace")]
struct Args {
    /// TCP port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = DEFAULT_BIND_ADDRESS)]
    bind: IpAddr,

    /// First path character served (inclusive)
    #[arg(long)]
    start_prefix: String,

    /// Path character where this shard stops (exclusive)
    #[arg(long)]
    end_prefix: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    let range = ShardRange::parse(&args.start_prefix, &args.end_prefix)
        .context("invalid shard range")?;
    let config = ShardServerConfig::new(SocketAddr::new(args.bind, args.port), range);

    ShardServer::new(config)
        .run()
        .await
        .context("shard server stopped")
}
