//! Shard ranges and the static shard table.
//!
//! A shard owns every absolute path whose first character after the leading
//! separator falls in `[start, end)`. Characters compare by raw ordinal, with
//! no case folding. The root belongs to every shard.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::SEPARATOR;

/// Errors from shard range construction and path checks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("invalid shard range [{start}, {end}): start must sort before end")]
    InvalidRange { start: char, end: char },

    #[error("shard prefix must be exactly one character, got {0:?}")]
    InvalidPrefix(String),

    #[error("empty path")]
    EmptyPath,

    #[error("paths must be absolute: {0}")]
    RelativePath(String),

    #[error("path {path} isn't intended for shard {range}")]
    OutOfRange { path: String, range: ShardRange },
}

/// Errors from loading a shard table.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read shard table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed shard table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("shard {index}: {source}")]
    Shard {
        index: usize,
        #[source]
        source: ShardError,
    },

    #[error("shard table lists no servers")]
    Empty,
}

/// Half-open range of first path characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardRange {
    start: char,
    end: char,
}

impl fmt::Display for ShardRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

fn single_char(prefix: &str) -> Result<char, ShardError> {
    let mut chars = prefix.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ShardError::InvalidPrefix(prefix.to_string())),
    }
}

impl ShardRange {
    pub fn new(start: char, end: char) -> Result<Self, ShardError> {
        if start >= end {
            return Err(ShardError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range from two one-character prefixes.
    pub fn parse(start: &str, end: &str) -> Result<Self, ShardError> {
        Self::new(single_char(start)?, single_char(end)?)
    }

    pub fn start(&self) -> char {
        self.start
    }

    pub fn end(&self) -> char {
        self.end
    }

    /// Returns true if `path` (assumed absolute) belongs to this range.
    pub fn owns(&self, path: &str) -> bool {
        let Some(rel) = path.strip_prefix(SEPARATOR) else {
            return false;
        };
        match rel.chars().next() {
            None => true,
            Some(first) => self.start <= first && first < self.end,
        }
    }

    /// Validate a path arriving at the shard that owns this range.
    pub fn check(&self, path: &str) -> Result<(), ShardError> {
        if path.is_empty() {
            return Err(ShardError::EmptyPath);
        }
        if !path.starts_with(SEPARATOR) {
            return Err(ShardError::RelativePath(path.to_string()));
        }
        if !self.owns(path) {
            return Err(ShardError::OutOfRange {
                path: path.to_string(),
                range: *self,
            });
        }
        Ok(())
    }
}

/// One shard table entry as it appears on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawShard {
    start_prefix: String,
    end_prefix: String,
    #[serde(alias = "addr_prefix")]
    addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawTable {
    servers: Vec<RawShard>,
}

/// A shard range and the address of the server that owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardSpec {
    pub range: ShardRange,
    pub address: String,
}

/// Ordered, immutable list of shards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardTable {
    shards: Vec<ShardSpec>,
}

impl ShardTable {
    pub fn new(shards: Vec<ShardSpec>) -> Self {
        Self { shards }
    }

    /// Parse a JSON shard table:
    /// `{"servers": [{"start_prefix": "a", "end_prefix": "n", "addr": "host:port"}]}`.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawTable = serde_json::from_str(json)?;
        if raw.servers.is_empty() {
            return Err(ConfigError::Empty);
        }
        let shards = raw
            .servers
            .into_iter()
            .enumerate()
            .map(|(index, s)| {
                let range = ShardRange::parse(&s.start_prefix, &s.end_prefix)
                    .map_err(|source| ConfigError::Shard { index, source })?;
                Ok(ShardSpec {
                    range,
                    address: s.addr,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Ok(Self { shards })
    }

    /// Read and parse a JSON shard table from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn shards(&self) -> &[ShardSpec] {
        &self.shards
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Table positions of every shard owning `path`, in table order.
    pub fn owners(&self, path: &str) -> Vec<usize> {
        self.shards
            .iter()
            .enumerate()
            .filter(|(_, s)| s.range.owns(path))
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn two_shards() -> ShardTable {
        ShardTable::from_json(
            r#"{"servers": [
                {"start_prefix": "a", "end_prefix": "n", "addr": "127.0.0.1:5001"},
                {"start_prefix": "n", "end_prefix": "z", "addr": "127.0.0.1:5002"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_range_validation() {
        assert!(ShardRange::new('a', 'n').is_ok());
        assert_eq!(
            ShardRange::new('n', 'a'),
            Err(ShardError::InvalidRange { start: 'n', end: 'a' })
        );
        assert!(ShardRange::new('a', 'a').is_err());
        assert_eq!(
            ShardRange::parse("ab", "z"),
            Err(ShardError::InvalidPrefix("ab".into()))
        );
        assert!(ShardRange::parse("", "z").is_err());
    }

    #[test]
    fn test_owns() {
        let range = ShardRange::new('a', 'n').unwrap();
        assert!(range.owns("/"));
        assert!(range.owns("/apple"));
        assert!(range.owns("/m/deep/path"));
        assert!(!range.owns("/n"));
        assert!(!range.owns("/Apple"));
        assert!(!range.owns("relative"));
    }

    #[test]
    fn test_check() {
        let range = ShardRange::new('a', 'n').unwrap();
        assert_eq!(range.check(""), Err(ShardError::EmptyPath));
        assert!(matches!(range.check("bar"), Err(ShardError::RelativePath(_))));
        assert!(matches!(range.check("/zoo"), Err(ShardError::OutOfRange { .. })));
        assert!(range.check("/bar/file").is_ok());
        assert!(range.check("/").is_ok());
    }

    #[test]
    fn test_table_owners() {
        let table = two_shards();
        assert_eq!(table.len(), 2);
        assert_eq!(table.owners("/"), vec![0, 1]);
        assert_eq!(table.owners("/bar"), vec![0]);
        assert_eq!(table.owners("/zoo"), Vec::<usize>::new());
        assert_eq!(table.owners("/nest"), vec![1]);
        assert_eq!(table.shards()[1].address, "127.0.0.1:5002");
    }

    #[test]
    fn test_legacy_addr_key() {
        let table = ShardTable::from_json(
            r#"{"servers": [{"start_prefix": "a", "end_prefix": "z", "addr_prefix": "h:1"}]}"#,
        )
        .unwrap();
        assert_eq!(table.shards()[0].address, "h:1");
    }

    #[test]
    fn test_table_errors() {
        assert!(matches!(
            ShardTable::from_json(r#"{"servers": []}"#),
            Err(ConfigError::Empty)
        ));
        assert!(matches!(
            ShardTable::from_json("not json"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            ShardTable::from_json(
                r#"{"servers": [{"start_prefix": "z", "end_prefix": "a", "addr": "h:1"}]}"#
            ),
            Err(ConfigError::Shard { index: 0, .. })
        ));
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers": [{{"start_prefix": "a", "end_prefix": "z", "addr": "localhost:9000"}}]}}"#
        )
        .unwrap();
        let table = ShardTable::load(file.path()).unwrap();
        assert_eq!(table.shards()[0].range, ShardRange::new('a', 'z').unwrap());

        assert!(matches!(
            ShardTable::load("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
