//! Configuration module
//!
//! Handles CLI argument parsing, TOML session files, and validation.

pub mod cli;
pub mod toml;
pub mod validator;

use anyhow::Result;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Records per batch when not configured
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// First query port tried when not configured
pub const DEFAULT_QUERY_PORT: u16 = 29512;

/// Query handler count when not configured
pub const DEFAULT_THREADS: usize = 10;

/// Pause between the handshakes and the first batch when not configured
pub const DEFAULT_SETTLE_MS: u64 = 5000;

/// Resolved session configuration
///
/// Built once at startup and shared read-only by every phase.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Hosts file listing the slaves
    pub hosts_file: PathBuf,
    /// Records per batch
    pub batch_size: usize,
    /// First candidate port for the query front end
    pub query_port: u16,
    /// Skip handshake and distribution
    pub query_only: bool,
    /// Concurrent query handlers
    pub threads: usize,
    /// Record stream file; standard input when `None`
    pub input: Option<PathBuf>,
    /// Pause after the handshakes, in milliseconds
    pub settle_ms: u64,
}

impl SessionConfig {
    /// Configuration with default settings for the given hosts file
    pub fn new(hosts_file: impl Into<PathBuf>) -> Self {
        Self {
            hosts_file: hosts_file.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            query_port: DEFAULT_QUERY_PORT,
            query_only: false,
            threads: DEFAULT_THREADS,
            input: None,
            settle_ms: DEFAULT_SETTLE_MS,
        }
    }

    /// Resolve from CLI arguments and the optional TOML session file
    pub fn resolve(cli: &cli::Cli) -> Result<Self> {
        let file = match cli.config {
            Some(ref path) => toml::parse_toml_file(path)?,
            None => toml::SessionFile::default(),
        };

        toml::merge_cli_with_file(cli, file)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configuration:")?;
        writeln!(f, "  Hosts file: {}", self.hosts_file.display())?;
        writeln!(f, "  Mode: {}", if self.query_only { "query only" } else { "scatter + gather" })?;
        if !self.query_only {
            match self.input {
                Some(ref path) => writeln!(f, "  Input: {}", path.display())?,
                None => writeln!(f, "  Input: <stdin>")?,
            }
            writeln!(f, "  Batch size: {} records", self.batch_size)?;
            writeln!(f, "  Settle delay: {} ms", self.settle_ms)?;
        }
        writeln!(f, "  Query port: {}", self.query_port)?;
        write!(f, "  Query threads: {}", self.threads)
    }
}
