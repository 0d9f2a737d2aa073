//! CLI argument parsing using clap

use clap::Parser;
use std::path::PathBuf;

/// ncdistribute - scatter a record stream to slaves and serve queries over them
///
/// Reads the record stream (schema header followed by fixed-size records)
/// from standard input unless --input is given.
#[derive(Parser, Debug)]
#[command(name = "ncdistribute")]
#[command(version, about, long_about = None)]
#[command(disable_help_flag = true)]
pub struct Cli {
    /// Hosts file: address:port for query-only hosts, address:port:d for hosts running a daemon
    #[arg(short = 'h', long, env = "NCDISTRIBUTE_HOSTS", value_name = "HOSTS_FILE")]
    pub hosts: Option<PathBuf>,

    /// Records per batch sent to each host [default: 10000]
    #[arg(short = 'b', long = "block", value_name = "BLOCK_SIZE")]
    pub batch_size: Option<usize>,

    /// First query port tried by the query front end [default: 29512]
    #[arg(short = 'q', long = "query", value_name = "QUERY_PORT")]
    pub query_port: Option<u16>,

    /// Only offer queries (skip the daemon handshake and record distribution)
    #[arg(short = 'o', long)]
    pub query_only: bool,

    /// Number of concurrent query handlers [default: 10]
    #[arg(short = 't', long, value_name = "THREADS")]
    pub threads: Option<usize>,

    /// Record stream file (default: standard input)
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Delay between the daemon handshakes and the first batch, in milliseconds [default: 5000]
    #[arg(long, value_name = "MS")]
    pub settle_ms: Option<u64>,

    // === Configuration File ===
    /// TOML session file (CLI options take precedence)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Dry run - load the hosts file and configuration without any network activity
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Print help
    #[arg(long, action = clap::ArgAction::Help)]
    pub help: Option<bool>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
