//! Daemon handshake
//!
//! Wakes a daemon-capable slave for this session:
//!
//! 1. Connect to the daemon, send the schema, close the connection
//! 2. Reconnect and read the daemon's reply until it closes the connection
//! 3. Store the assigned insert and query ports on the slave
//!
//! Closing after the schema is what tells the daemon the message is complete.
//! Network failures are returned to the caller; nothing is retried here.

use crate::distributed::protocol::{parse_daemon_reply, DaemonReply};
use crate::distributed::registry::Slave;
use crate::source::SchemaDescription;
use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Run the handshake with one slave's daemon
///
/// On `DaemonReply::Error` the slave is left untouched and the reply is
/// returned so the caller can decide what to do with it.
pub async fn wake_slave(slave: &mut Slave, schema: &SchemaDescription) -> Result<DaemonReply> {
    let endpoint = slave
        .daemon_endpoint()
        .with_context(|| format!("Slave {} has no daemon port", slave.address))?;

    info!(%endpoint, "Connecting to daemon");
    let mut stream = TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("Failed to connect to daemon {}", endpoint))?;

    debug!(%endpoint, bytes = schema.to_string().len(), "Sending schema to daemon");
    stream
        .write_all(schema.to_string().as_bytes())
        .await
        .with_context(|| format!("Failed to send schema to daemon {}", endpoint))?;
    stream
        .shutdown()
        .await
        .with_context(|| format!("Failed to close schema connection to {}", endpoint))?;
    drop(stream);

    debug!(%endpoint, "Waiting for daemon to send insert and query ports");
    let mut stream = TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("Failed to reconnect to daemon {}", endpoint))?;

    let mut response = Vec::new();
    let received = stream
        .read_to_end(&mut response)
        .await
        .with_context(|| format!("Failed to read reply from daemon {}", endpoint))?;
    debug!(%endpoint, received, "Received daemon reply");

    let text = String::from_utf8_lossy(&response);
    let reply = parse_daemon_reply(&text)
        .with_context(|| format!("Daemon {} sent an invalid reply", endpoint))?;

    match reply {
        DaemonReply::Assigned { insert_port, query_port } => {
            info!(%endpoint, insert_port, query_port, "Daemon assigned ports");
            slave.insert_port = Some(insert_port);
            slave.query_port = Some(query_port);
        }
        DaemonReply::Error => {
            warn!(%endpoint, "Daemon returned an error; slave will not receive records");
        }
    }

    Ok(reply)
}

/// Wake every daemon-capable slave, one at a time, in registry order
///
/// Returns the number of slaves that were assigned ports.
pub async fn wake_all(slaves: &mut [Slave], schema: &SchemaDescription) -> Result<usize> {
    let mut assigned = 0;

    for slave in slaves.iter_mut().filter(|s| s.is_daemon_capable()) {
        if let DaemonReply::Assigned { .. } = wake_slave(slave, schema).await? {
            assigned += 1;
        }
    }

    Ok(assigned)
}
