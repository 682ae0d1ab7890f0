//! Shard router: maps absolute paths onto shard servers.
//!
//! Single-key operations go to exactly one shard. `list_dir` is the one range
//! operation: it fans out to every owning shard in parallel, waits for all of
//! them, and reports the first failure to complete. Side effects already
//! applied on other shards are not undone, and nothing is retried.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use shardfs_kernel::{Listing, SEPARATOR, ShardTable};

use crate::rpc::{RpcError, ShardClient};
use crate::{ConnectError, connect_tcp};

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("path must be absolute: {0}")]
    RelativePath(String),

    #[error("no shard serves {0}")]
    NoShard(String),

    #[error("{path} maps to {shards} shards; this operation needs exactly one")]
    Routing { path: String, shards: usize },

    #[error("shard {address}: {source}")]
    Shard {
        address: String,
        #[source]
        source: RpcError,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("dispatch task failed: {0}")]
    Join(#[source] JoinError),

    #[error("router has {clients} clients for {shards} shards")]
    Mismatch { clients: usize, shards: usize },
}

impl RouterError {
    /// The underlying RPC failure, if a shard reported one.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            RouterError::Shard { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Table positions of the shards that own `path`.
///
/// The root maps to every shard; any other absolute path to the shards whose
/// range contains its first character.
pub fn route(table: &ShardTable, path: &str) -> Result<Vec<usize>, RouterError> {
    if !path.starts_with(SEPARATOR) {
        return Err(RouterError::RelativePath(path.to_string()));
    }
    let owners = table.owners(path);
    if owners.is_empty() {
        return Err(RouterError::NoShard(path.to_string()));
    }
    Ok(owners)
}

/// Client-side view of a sharded namespace.
///
/// Must be used within a `tokio::task::LocalSet`.
pub struct ShardRouter {
    table: ShardTable,
    clients: Vec<ShardClient>,
}

impl ShardRouter {
    /// Pair a table with one connected client per entry, in table order.
    pub fn new(table: ShardTable, clients: Vec<ShardClient>) -> Result<Self, RouterError> {
        if table.len() != clients.len() {
            return Err(RouterError::Mismatch {
                clients: clients.len(),
                shards: table.len(),
            });
        }
        Ok(Self { table, clients })
    }

    /// Connect to every shard in the table over TCP.
    pub async fn connect(table: ShardTable) -> Result<Self, ConnectError> {
        let mut clients = Vec::with_capacity(table.len());
        for shard in table.shards() {
            debug!(address = %shard.address, range = %shard.range, "connecting to shard");
            clients.push(connect_tcp(&shard.address).await?);
        }
        Ok(Self { table, clients })
    }

    pub fn table(&self) -> &ShardTable {
        &self.table
    }

    /// Table positions of the shards that own `path`.
    pub fn shards_for(&self, path: &str) -> Result<Vec<usize>, RouterError> {
        route(&self.table, path)
    }

    fn address(&self, shard: usize) -> String {
        self.table.shards()[shard].address.clone()
    }

    /// The one shard owning `path`, for single-key operations.
    fn single(&self, path: &str) -> Result<(usize, &ShardClient), RouterError> {
        match self.shards_for(path)?.as_slice() {
            [shard] => Ok((*shard, &self.clients[*shard])),
            owners => Err(RouterError::Routing {
                path: path.to_string(),
                shards: owners.len(),
            }),
        }
    }

    fn shard_err(&self, shard: usize) -> impl FnOnce(RpcError) -> RouterError + '_ {
        move |source| RouterError::Shard {
            address: self.address(shard),
            source,
        }
    }

    pub async fn make_dir(&self, path: &str) -> Result<(), RouterError> {
        let (shard, client) = self.single(path)?;
        client.make_dir(path).await.map_err(self.shard_err(shard))
    }

    pub async fn remove(&self, path: &str) -> Result<(), RouterError> {
        let (shard, client) = self.single(path)?;
        client.remove(path).await.map_err(self.shard_err(shard))
    }

    pub async fn create_file(&self, path: &str) -> Result<(), RouterError> {
        let (shard, client) = self.single(path)?;
        client.create_file(path).await.map_err(self.shard_err(shard))
    }

    pub async fn read_file<W>(&self, path: &str, output: &mut W) -> Result<u64, RouterError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (shard, client) = self.single(path)?;
        client
            .read_file(path, output)
            .await
            .map_err(self.shard_err(shard))
    }

    pub async fn write_file<R>(&self, path: &str, source: &mut R) -> Result<u64, RouterError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let (shard, client) = self.single(path)?;
        client
            .write_file(path, source)
            .await
            .map_err(self.shard_err(shard))
    }

    /// List a directory across every owning shard.
    pub async fn list_dir(&self, path: &str) -> Result<Listing, RouterError> {
        self.list_dir_cancellable(path, CancellationToken::new()).await
    }

    /// As [`list_dir`](Self::list_dir), aborting dispatches still in flight
    /// once `cancel` fires.
    ///
    /// Every dispatch is joined before anything is reported. The error
    /// returned is the first one to complete, not the first in table order.
    pub async fn list_dir_cancellable(
        &self,
        path: &str,
        cancel: CancellationToken,
    ) -> Result<Listing, RouterError> {
        let owners = self.shards_for(path)?;
        debug!(path, shards = owners.len(), "list_dir fan-out");

        let outcomes = fan_out(&owners, &cancel, |shard| {
            let client = self.clients[shard].clone();
            let path = path.to_string();
            async move { client.list_dir(&path).await }
        })
        .await;

        let mut merged = Listing::default();
        let mut first_error = None;
        for outcome in outcomes {
            let result = match outcome {
                Ok((_, Ok(listing))) => Ok(listing),
                Ok((_, Err(None))) => Err(RouterError::Cancelled),
                Ok((shard, Err(Some(source)))) => Err(RouterError::Shard {
                    address: self.address(shard),
                    source,
                }),
                Err(source) => Err(RouterError::Join(source)),
            };
            match result {
                Ok(listing) => merged.extend(listing),
                Err(e) => {
                    warn!(path, error = %e, "list_dir dispatch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }
}

/// Outcome of one shard dispatch: `Err(None)` when cancelled.
type Dispatched<T> = Result<(usize, Result<T, Option<RpcError>>), JoinError>;

/// Run `dispatch` for every shard in `owners` as local tasks and collect the
/// outcomes in completion order.
///
/// Dropping the returned future aborts every dispatch still running.
async fn fan_out<T, F, Fut>(
    owners: &[usize],
    cancel: &CancellationToken,
    mut dispatch: F,
) -> Vec<Dispatched<T>>
where
    T: 'static,
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, RpcError>> + 'static,
{
    let mut tasks = JoinSet::new();
    for &shard in owners {
        let call = dispatch(shard);
        let cancel = cancel.clone();
        tasks.spawn_local(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(None),
                result = call => result.map_err(Some),
            };
            (shard, outcome)
        });
    }

    let mut outcomes = Vec::with_capacity(owners.len());
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(joined);
    }
    outcomes
}
