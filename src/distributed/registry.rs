//! Slave registry
//!
//! Parses the hosts file into an ordered list of slaves. File order is kept:
//! it is the round-robin order used when scattering records.
//!
//! # Hosts File Format
//!
//! ```text
//! # query-only slave (port is its query port)
//! 10.0.1.10:29600
//! # daemon-capable slave (port is its daemon port)
//! 10.0.1.11:29000:d
//! ```
//!
//! Any third field marks the entry as daemon-capable; its value is ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading the hosts file
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Hosts file could not be opened or read
    #[error("Unable to open hosts file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Entry that does not match `address:port[:d]`
    #[error("Malformed hosts entry at line {line} ({content:?}): {reason}")]
    Malformed {
        line: usize,
        content: String,
        reason: &'static str,
    },
}

/// One worker node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slave {
    /// Host identifier (IP literal or host name)
    pub address: String,

    /// Daemon port, set for daemon-capable entries
    pub daemon_port: Option<u16>,

    /// Insert port negotiated by the daemon handshake
    pub insert_port: Option<u16>,

    /// Query port, from the hosts file or the daemon handshake
    pub query_port: Option<u16>,
}

impl Slave {
    /// Query-only slave
    pub fn query_only(address: impl Into<String>, query_port: u16) -> Self {
        Self {
            address: address.into(),
            daemon_port: None,
            insert_port: None,
            query_port: Some(query_port),
        }
    }

    /// Daemon-capable slave awaiting its handshake
    pub fn with_daemon(address: impl Into<String>, daemon_port: u16) -> Self {
        Self {
            address: address.into(),
            daemon_port: Some(daemon_port),
            insert_port: None,
            query_port: None,
        }
    }

    pub fn is_daemon_capable(&self) -> bool {
        self.daemon_port.is_some()
    }

    /// `address:daemon_port`, if daemon-capable
    pub fn daemon_endpoint(&self) -> Option<String> {
        self.daemon_port.map(|p| format!("{}:{}", self.address, p))
    }

    /// `address:insert_port`, once the handshake assigned one
    pub fn insert_endpoint(&self) -> Option<String> {
        self.insert_port.map(|p| format!("{}:{}", self.address, p))
    }

    /// `address:query_port`, if known
    pub fn query_endpoint(&self) -> Option<String> {
        self.query_port.map(|p| format!("{}:{}", self.address, p))
    }
}

impl fmt::Display for Slave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.daemon_port {
            Some(port) => write!(f, "Daemon: {}:{}", self.address, port),
            None => write!(f, "Query : {}:{}", self.address, fmt_port(self.query_port)),
        }
    }
}

fn fmt_port(port: Option<u16>) -> String {
    port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Load and parse a hosts file
pub fn load_hosts_file(path: &Path) -> Result<Vec<Slave>, RegistryError> {
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    parse_hosts(&content)
}

/// Parse hosts file content
///
/// Blank lines and `#` comments are skipped.
pub fn parse_hosts(content: &str) -> Result<Vec<Slave>, RegistryError> {
    let mut slaves = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let slave = parse_entry(line).map_err(|reason| RegistryError::Malformed {
            line: idx + 1,
            content: raw.to_string(),
            reason,
        })?;

        tracing::debug!(%slave, "Registered slave");
        slaves.push(slave);
    }

    Ok(slaves)
}

/// Parse one `address:port[:d]` entry
fn parse_entry(line: &str) -> Result<Slave, &'static str> {
    let mut parts = line.splitn(3, ':');

    let address = parts.next().unwrap_or_default().trim();
    if address.is_empty() {
        return Err("missing address");
    }

    let port = parts.next().ok_or("missing port")?.trim();
    let port: u16 = port.parse().map_err(|_| "port is not a number in 1-65535")?;
    if port == 0 {
        return Err("port is not a number in 1-65535");
    }

    // Presence of a third field is what marks the daemon port
    if parts.next().is_some() {
        Ok(Slave::with_daemon(address, port))
    } else {
        Ok(Slave::query_only(address, port))
    }
}
