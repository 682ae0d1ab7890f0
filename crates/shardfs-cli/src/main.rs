//! shardfs interactive shell
//!
//! ## Usage
//!
//! ```bash
//! # One in-process namespace
//! shardfs local
//!
//! # Shard servers listed in a JSON table
//! shardfs remote --config ~/shards.json
//! ```

mod command;
mod disk;
mod shell;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use shardfs_client::ShardRouter;
use shardfs_kernel::ShardTable;

use crate::shell::{LocalShell, RemoteShell};

#[derive(Parser, Debug)]
#[command(name = "shardfs", about = "Interactive shell for a shardfs namespace")]
struct Args {
    #[command(subcommand)]
    mode: ModeArgs,
}

#[derive(Subcommand, Debug)]
enum ModeArgs {
    /// Work on a private in-memory namespace
    Local,
    /// Work on shard servers through the router
    Remote {
        /// Shard table (default: <config dir>/shardfs/shards.json)
        #[arg(long)]
        config: Option<String>,
    },
}

fn config_path(config: Option<&str>) -> anyhow::Result<PathBuf> {
    match config {
        Some(path) => Ok(shellexpand::tilde(path).as_ref().into()),
        None => dirs::config_dir()
            .map(|dir| dir.join("shardfs").join("shards.json"))
            .context("no config directory; pass --config"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so they never interleave with command output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    // Cap'n Proto RPC requires LocalSet for !Send types
    let local_set = tokio::task::LocalSet::new();
    local_set.run_until(run_shell(args)).await
}

async fn run_shell(args: Args) -> anyhow::Result<()> {
    match args.mode {
        ModeArgs::Local => shell::run(&LocalShell::new()).await,
        ModeArgs::Remote { config } => {
            let path = config_path(config.as_deref())?;
            let table = ShardTable::load(&path)
                .with_context(|| format!("loading shard table {}", path.display()))?;
            tracing::info!(shards = table.len(), "connecting to shard servers");
            let router = ShardRouter::connect(table)
                .await
                .context("connecting to shard servers")?;
            shell::run(&RemoteShell::new(router)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_config_path_expands_tilde() {
        let path = config_path(Some("/etc/shardfs/shards.json")).unwrap();
        assert_eq!(path, PathBuf::from("/etc/shardfs/shards.json"));

        let path = config_path(Some("~/shards.json")).unwrap();
        assert!(path.ends_with("shards.json"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["shardfs", "remote", "--config", "s.json"]).unwrap();
        assert!(matches!(args.mode, ModeArgs::Remote { config: Some(ref c) } if c == "s.json"));
        assert!(Args::try_parse_from(["shardfs"]).is_err());
    }
}
