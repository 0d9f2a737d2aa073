//! Fan-out query front end
//!
//! The default [`QueryFrontEnd`] used by the binary. It listens on the query
//! port and relays each client request line to every slave that has a query
//! port, answering with the raw per-slave replies as a JSON array:
//!
//! ```text
//! [
//!   {"address": "10.0.1.10", "query_port": 29600, "response": "..."},
//!   {"address": "10.0.1.11", "query_port": 29601, "error": "connection refused"}
//! ]
//! ```
//!
//! Interpreting or merging the replies is left to the caller.

use crate::distributed::gather::{FrontEndError, QueryFrontEnd};
use crate::distributed::registry::Slave;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, Semaphore};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Largest request head accepted from a client
pub const MAX_REQUEST_HEAD: usize = 64 * 1024;

/// Pause after a failed accept (descriptor exhaustion and the like)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Slave reachable on a query port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTarget {
    pub address: String,
    pub query_port: u16,
}

/// Reply of one slave to a relayed request
#[derive(Debug, Clone, Serialize)]
pub struct SlaveReply {
    pub address: String,
    pub query_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Query front end relaying requests to all slaves
pub struct FanoutMaster {
    targets: Arc<Vec<QueryTarget>>,
    shutdown: Arc<Notify>,
}

impl FanoutMaster {
    /// Build from the slave list; slaves without a query port are skipped
    pub fn new(slaves: &[Slave]) -> Self {
        let mut targets = Vec::new();
        for slave in slaves {
            match slave.query_port {
                Some(query_port) => targets.push(QueryTarget {
                    address: slave.address.clone(),
                    query_port,
                }),
                None => warn!(slave = %slave.address, "Slave has no query port; not queried"),
            }
        }

        Self {
            targets: Arc::new(targets),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn targets(&self) -> &[QueryTarget] {
        &self.targets
    }

    /// Handle that stops a running `start` when notified
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }
}

#[async_trait]
impl QueryFrontEnd for FanoutMaster {
    async fn start(&mut self, port: u16, threads: usize) -> Result<(), FrontEndError> {
        if threads == 0 {
            return Err(FrontEndError::Init {
                port,
                reason: "at least one serving thread is required".to_string(),
            });
        }

        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| FrontEndError::Bind { port, source })?;

        info!(port, threads, slaves = self.targets.len(), "Query front end listening");

        let permits = Arc::new(Semaphore::new(threads));
        loop {
            // Free handler first; shutdown must still be seen while all are busy
            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Ok(()),
                },
                _ = self.shutdown.notified() => break,
            };

            let (client, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept query connection");
                        tokio::select! {
                            _ = sleep(ACCEPT_BACKOFF) => continue,
                            _ = self.shutdown.notified() => break,
                        }
                    }
                },
                _ = self.shutdown.notified() => break,
            };

            let targets = self.targets.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_client(client, &targets).await {
                    warn!(%peer, error = %e, "Query request failed");
                }
                drop(permit);
            });
        }

        info!(port, "Query front end shutting down");
        Ok(())
    }
}

/// Relay one client request and answer with the collected replies
async fn handle_client(mut client: TcpStream, targets: &[QueryTarget]) -> Result<()> {
    let request_line = read_request_line(&mut client).await?;
    debug!(request = %request_line, "Relaying query");

    let mut replies = Vec::with_capacity(targets.len());
    for target in targets {
        let reply = match relay(target, &request_line).await {
            Ok(response) => SlaveReply {
                address: target.address.clone(),
                query_port: target.query_port,
                response: Some(response),
                error: None,
            },
            Err(e) => SlaveReply {
                address: target.address.clone(),
                query_port: target.query_port,
                response: None,
                error: Some(format!("{:#}", e)),
            },
        };
        replies.push(reply);
    }

    let body = serde_json::to_vec(&replies).context("Failed to encode replies")?;
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    client.write_all(head.as_bytes()).await.context("Failed to write reply head")?;
    client.write_all(&body).await.context("Failed to write reply body")?;
    client.shutdown().await.context("Failed to close client connection")?;

    Ok(())
}

/// Read the request head and return its first line
async fn read_request_line(client: &mut TcpStream) -> Result<String> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = client.read(&mut chunk).await.context("Failed to read request")?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);

        if head.windows(4).any(|w| w == b"\r\n\r\n") || head.windows(2).any(|w| w == b"\n\n") {
            break;
        }
        if head.len() > MAX_REQUEST_HEAD {
            anyhow::bail!("Request head larger than {} bytes", MAX_REQUEST_HEAD);
        }
    }

    let text = String::from_utf8_lossy(&head);
    let line = text.lines().next().unwrap_or_default().trim().to_string();
    if line.is_empty() {
        anyhow::bail!("Empty request");
    }

    Ok(line)
}

/// Send the request line to one slave and return the body of its reply
async fn relay(target: &QueryTarget, request_line: &str) -> Result<String> {
    let endpoint = format!("{}:{}", target.address, target.query_port);
    let mut stream = TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("Failed to connect to {}", endpoint))?;

    let request = format!(
        "{}\r\nHost: {}\r\nConnection: close\r\n\r\n",
        request_line, endpoint
    );
    stream.write_all(request.as_bytes()).await.context("Failed to send request")?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.context("Failed to read reply")?;

    let text = String::from_utf8_lossy(&response);
    let body = match text.split_once("\r\n\r\n") {
        Some((_, body)) => body,
        None => &text,
    };

    Ok(body.to_string())
}
