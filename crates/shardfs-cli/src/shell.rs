//! Line-oriented shell over a local namespace or the shard router.

use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};

use shardfs_client::ShardRouter;
use shardfs_kernel::{Listing, Namespace, ROOT};

use crate::command::{Command, Invocation, Mode, parse};
use crate::disk;

/// Something the shell can drive.
pub trait Backend {
    fn mode(&self) -> Mode;

    /// Run one validated invocation, returning the text to print.
    async fn execute(&self, invocation: &Invocation<'_>) -> anyhow::Result<String>;
}

/// Parse and run one line.
pub async fn handle<B: Backend>(backend: &B, line: &str) -> anyhow::Result<String> {
    let invocation = parse(line, backend.mode())?;
    backend.execute(&invocation).await
}

/// Read commands from stdin until EOF. Failures are reported and the loop
/// carries on.
pub async fn run<B: Backend>(backend: &B) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Enter a filesystem command (help lists them).");

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match handle(backend, &line).await {
            Ok(output) if output.is_empty() => {}
            Ok(output) => println!("{output}"),
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

/// Files as `size<TAB>name`, then directories as `<TAB>name/`, each sorted.
fn format_listing(listing: &Listing, full_paths: bool) -> String {
    let mut files: Vec<_> = listing.files.iter().collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let mut dirs: Vec<_> = listing.dirs.iter().collect();
    dirs.sort_by(|a, b| a.path.cmp(&b.path));

    let files = files.into_iter().map(|f| {
        let label = if full_paths { &f.path } else { &f.name };
        format!("{}\t{}", f.size, label)
    });
    let dirs = dirs.into_iter().map(|d| {
        let label = if full_paths { &d.path } else { &d.name };
        format!("\t{label}/")
    });
    files.chain(dirs).collect::<Vec<_>>().join("\n")
}

fn byte_count(n: u64) -> String {
    format!("{n} bytes")
}

/// Shell over one in-process namespace.
#[derive(Default)]
pub struct LocalShell {
    namespace: Namespace,
}

impl LocalShell {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for LocalShell {
    fn mode(&self) -> Mode {
        Mode::Local
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> anyhow::Result<String> {
        let ns = &self.namespace;
        let args = &invocation.args;
        let output = match invocation.command {
            Command::Add => {
                ns.create_file(args[0])?;
                String::new()
            }
            Command::Cd => {
                ns.change_dir(args[0])?;
                String::new()
            }
            Command::Find => format_listing(&ns.find(args[0], args[1])?, true),
            Command::Help => Mode::Local.help(),
            Command::Ls => format_listing(&ns.list(args.first().copied().unwrap_or(""))?, false),
            Command::Mkdir => {
                ns.make_dir(args[0])?;
                String::new()
            }
            Command::Mv => {
                ns.rename(args[0], args[1])?;
                String::new()
            }
            Command::Pwd => ns.current_dir(),
            Command::Read => {
                let mut file = disk::create(args[1]).await?;
                let n = ns.read(args[0], &mut file).await?;
                disk::finish(file, args[1]).await?;
                byte_count(n)
            }
            Command::Regex => ns.find_first_regex(args[1], args[0])?,
            Command::Rm => {
                ns.remove(args[0])?;
                String::new()
            }
            Command::Write => {
                let mut file = disk::open(args[0]).await?;
                byte_count(ns.write(args[1], &mut file).await?)
            }
        };
        Ok(output)
    }
}

/// Shell over the shard router. Must run inside a `LocalSet`.
pub struct RemoteShell {
    router: ShardRouter,
}

impl RemoteShell {
    pub fn new(router: ShardRouter) -> Self {
        Self { router }
    }
}

impl Backend for RemoteShell {
    fn mode(&self) -> Mode {
        Mode::Remote
    }

    async fn execute(&self, invocation: &Invocation<'_>) -> anyhow::Result<String> {
        let router = &self.router;
        let args = &invocation.args;
        let output = match invocation.command {
            Command::Add => {
                router.create_file(args[0]).await?;
                String::new()
            }
            Command::Help => Mode::Remote.help(),
            Command::Ls => {
                let path = args.first().copied().unwrap_or(ROOT);
                format_listing(&router.list_dir(path).await?, false)
            }
            Command::Mkdir => {
                router.make_dir(args[0]).await?;
                String::new()
            }
            Command::Read => {
                let mut file = disk::create(args[1]).await?;
                let n = router.read_file(args[0], &mut file).await?;
                disk::finish(file, args[1]).await?;
                byte_count(n)
            }
            Command::Rm => {
                router.remove(args[0]).await?;
                String::new()
            }
            Command::Write => {
                let mut file = disk::open(args[0]).await?;
                byte_count(router.write_file(args[1], &mut file).await?)
            }
            other => anyhow::bail!("{other} is not available in this mode"),
        };
        Ok(output)
    }
}
