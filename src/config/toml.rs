//! TOML session file parsing
//!
//! Every key is optional; whatever the file leaves out comes from the CLI or
//! from the built-in defaults.
//!
//! ```toml
//! hosts_file = "/etc/ncdistribute/hosts"
//! batch_size = 20000
//! query_port = 29512
//! query_only = false
//! threads = 16
//! input = "/data/crime50k.nano"
//! settle_ms = 5000
//! ```

use super::cli::Cli;
use super::SessionConfig;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Session settings as written in a TOML file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFile {
    pub hosts_file: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub query_port: Option<u16>,
    pub query_only: Option<bool>,
    pub threads: Option<usize>,
    pub input: Option<PathBuf>,
    pub settle_ms: Option<u64>,
}

/// Parse TOML session file
pub fn parse_toml_file(path: &Path) -> Result<SessionFile> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML session settings from string
pub fn parse_toml_string(contents: &str) -> Result<SessionFile> {
    let file: SessionFile = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(file)
}

/// Merge CLI arguments with file settings (CLI takes precedence)
pub fn merge_cli_with_file(cli: &Cli, file: SessionFile) -> Result<SessionConfig> {
    let hosts_file = cli
        .hosts
        .clone()
        .or(file.hosts_file)
        .context("A hosts file is required (--hosts or hosts_file in the config file)")?;

    let defaults = SessionConfig::new(hosts_file);

    Ok(SessionConfig {
        batch_size: cli.batch_size.or(file.batch_size).unwrap_or(defaults.batch_size),
        query_port: cli.query_port.or(file.query_port).unwrap_or(defaults.query_port),
        query_only: cli.query_only || file.query_only.unwrap_or(defaults.query_only),
        threads: cli.threads.or(file.threads).unwrap_or(defaults.threads),
        input: cli.input.clone().or(file.input),
        settle_ms: cli.settle_ms.or(file.settle_ms).unwrap_or(defaults.settle_ms),
        ..defaults
    })
}
