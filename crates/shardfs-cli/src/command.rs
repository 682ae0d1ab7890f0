//! Shell command parsing.
//!
//! A line is a command word followed by space-separated arguments. Paths with
//! spaces are valid in the namespace but cannot be typed here.

use std::ops::RangeInclusive;
use std::str::FromStr;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command {0}")]
    Unknown(String),

    #[error("{0} is not available in this mode")]
    Unsupported(Command),

    #[error("wrong arguments; usage: {usage}")]
    WrongArguments { usage: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Command {
    Add,
    Cd,
    Find,
    Help,
    Ls,
    Mkdir,
    Mv,
    Pwd,
    Read,
    Regex,
    Rm,
    Write,
}

impl Command {
    pub fn usage(&self) -> &'static str {
        match self {
            Command::Add => "add <path> - create an empty file",
            Command::Cd => "cd <path> - change the current directory",
            Command::Find => "find <path> <name> - children of <path> named exactly <name>",
            Command::Help => "help - list commands",
            Command::Ls => "ls [path] - list a directory (default: current)",
            Command::Mkdir => "mkdir <path> - create a directory",
            Command::Mv => "mv <from> <to> - move a file or directory",
            Command::Pwd => "pwd - print the current directory",
            Command::Read => "read <path> <local> - copy a file out to local disk, truncating",
            Command::Regex => "regex <path> <pattern> - first node below <path> matching <pattern>",
            Command::Rm => "rm <path> - remove a file or empty directory",
            Command::Write => "write <local> <path> - replace a file's content from local disk",
        }
    }

    fn arity(&self) -> RangeInclusive<usize> {
        match self {
            Command::Help | Command::Pwd => 0..=0,
            Command::Ls => 0..=1,
            Command::Add | Command::Cd | Command::Mkdir | Command::Rm => 1..=1,
            Command::Find | Command::Mv | Command::Read | Command::Regex | Command::Write => 2..=2,
        }
    }
}

/// Which backend a shell drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// One in-process namespace.
    Local,
    /// Shard servers behind the router. There is no remote current
    /// directory, so paths must be absolute.
    Remote,
}

impl Mode {
    pub fn supports(&self, command: Command) -> bool {
        match self {
            Mode::Local => true,
            Mode::Remote => matches!(
                command,
                Command::Add
                    | Command::Help
                    | Command::Ls
                    | Command::Mkdir
                    | Command::Read
                    | Command::Rm
                    | Command::Write
            ),
        }
    }

    /// One usage line per supported command.
    pub fn help(&self) -> String {
        Command::iter()
            .filter(|c| self.supports(*c))
            .map(|c| c.usage())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A parsed shell line.
#[derive(Debug, PartialEq, Eq)]
pub struct Invocation<'a> {
    pub command: Command,
    pub args: Vec<&'a str>,
}

pub fn parse(line: &str, mode: Mode) -> Result<Invocation<'_>, CommandError> {
    let mut words = line.split_whitespace();
    let word = words.next().ok_or(CommandError::Empty)?;
    let command = Command::from_str(word).map_err(|_| CommandError::Unknown(word.to_string()))?;
    if !mode.supports(command) {
        return Err(CommandError::Unsupported(command));
    }

    let args: Vec<&str> = words.collect();
    if !command.arity().contains(&args.len()) {
        return Err(CommandError::WrongArguments {
            usage: command.usage(),
        });
    }
    Ok(Invocation { command, args })
}
