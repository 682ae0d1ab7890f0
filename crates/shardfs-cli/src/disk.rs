//! Local-disk ends of `read` and `write`.

use anyhow::Context;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Create or truncate the local destination of a `read`.
pub async fn create(path: &str) -> anyhow::Result<File> {
    File::create(path)
        .await
        .with_context(|| format!("cannot create local file {path}"))
}

/// Open the local source of a `write`.
pub async fn open(path: &str) -> anyhow::Result<File> {
    File::open(path)
        .await
        .with_context(|| format!("cannot open local file {path}"))
}

/// Flush buffered bytes to disk before the handle is dropped.
pub async fn finish(mut file: File, path: &str) -> anyhow::Result<()> {
    file.flush()
        .await
        .with_context(|| format!("cannot flush local file {path}"))?;
    file.sync_all()
        .await
        .with_context(|| format!("cannot sync local file {path}"))
}
