//! Daemon handshake protocol
//!
//! The handshake is plain text over two short-lived TCP connections to the
//! daemon port of each slave.
//!
//! # Message Flow
//!
//! ```text
//! Distributor                       Daemon
//!     |                              |
//!     |-------- SCHEMA ------------->|   (connection 1, then closed)
//!     |                              |
//!     |<--- STATUS:INSERT:QUERY -----|   (connection 2, closed by daemon)
//! ```
//!
//! `STATUS` is `ERROR` when the daemon could not start a server for the
//! session. Any other status is a success and carries the two ports.

use std::fmt;
use thiserror::Error;

/// Status literal sent by a daemon that refused the session
pub const ERROR_STATUS: &str = "ERROR";

/// Status this crate writes when rendering a successful reply
pub const OK_STATUS: &str = "OK";

/// Field separator of the reply
pub const SEPARATOR: char = ':';

/// Errors raised while parsing a daemon reply
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The daemon closed the connection without sending anything
    #[error("Daemon sent an empty reply")]
    Empty,

    /// Reply is not `STATUS:INSERT:QUERY`
    #[error("Expected 3 fields in daemon reply, got {found}: {reply:?}")]
    FieldCount { found: usize, reply: String },

    /// Port field is not a valid port number
    #[error("Invalid {field} port {value:?} in daemon reply")]
    InvalidPort { field: &'static str, value: String },
}

/// Parsed daemon reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonReply {
    /// Ports assigned for this session
    Assigned { insert_port: u16, query_port: u16 },

    /// Daemon reported `ERROR`; port fields carry no meaning
    Error,
}

impl fmt::Display for DaemonReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonReply::Assigned { insert_port, query_port } => {
                write!(f, "{OK_STATUS}{SEPARATOR}{insert_port}{SEPARATOR}{query_port}")
            }
            DaemonReply::Error => write!(f, "{ERROR_STATUS}{SEPARATOR}0{SEPARATOR}0"),
        }
    }
}

/// Parse a daemon reply
///
/// Surrounding whitespace (a trailing newline in particular) is ignored. An
/// `ERROR` status is accepted whatever follows it.
pub fn parse_daemon_reply(raw: &str) -> Result<DaemonReply, ProtocolError> {
    let reply = raw.trim();
    if reply.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let fields: Vec<&str> = reply.split(SEPARATOR).collect();
    if fields[0].trim() == ERROR_STATUS {
        return Ok(DaemonReply::Error);
    }

    if fields.len() != 3 {
        return Err(ProtocolError::FieldCount {
            found: fields.len(),
            reply: reply.to_string(),
        });
    }

    Ok(DaemonReply::Assigned {
        insert_port: parse_port("insert", fields[1])?,
        query_port: parse_port("query", fields[2])?,
    })
}

fn parse_port(field: &'static str, value: &str) -> Result<u16, ProtocolError> {
    value
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ProtocolError::InvalidPort {
            field,
            value: value.to_string(),
        })
}
