//! Loopback peers for network tests
//!
//! Small tokio tasks standing in for daemons and insert servers.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Fake daemon serving exactly one handshake
pub struct FakeDaemon {
    pub port: u16,
    /// Schema bytes received on the first connection
    pub schema: oneshot::Receiver<Vec<u8>>,
}

/// Spawn a daemon that reads the schema, then answers `reply` on the next connection
pub async fn spawn_daemon(reply: impl Into<String>) -> FakeDaemon {
    let reply = reply.into();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        let mut schema = Vec::new();
        conn.read_to_end(&mut schema).await.unwrap();
        drop(conn);
        let _ = tx.send(schema);

        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(reply.as_bytes()).await.unwrap();
        conn.shutdown().await.unwrap();
    });

    FakeDaemon { port, schema: rx }
}

/// Fake insert server recording the payload of every connection
pub struct FakeSink {
    pub port: u16,
    /// Payloads in arrival order, one entry per connection
    pub batches: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl FakeSink {
    pub fn received(&self) -> Vec<Vec<u8>> {
        self.batches.lock().unwrap().clone()
    }

    /// Wait until `count` connections were fully read
    pub async fn wait_for(&self, count: usize) -> Vec<Vec<u8>> {
        for _ in 0..200 {
            let received = self.received();
            if received.len() >= count {
                return received;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("sink received {} connections, expected {}", self.received().len(), count);
    }
}

/// Spawn an insert server accepting connections until the test ends
pub async fn spawn_sink() -> FakeSink {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let batches = Arc::new(Mutex::new(Vec::new()));
    let recorded = batches.clone();

    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            let mut payload = Vec::new();
            if conn.read_to_end(&mut payload).await.is_ok() {
                recorded.lock().unwrap().push(payload);
            }
        }
    });

    FakeSink { port, batches }
}

/// A port with nothing listening on it
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}
