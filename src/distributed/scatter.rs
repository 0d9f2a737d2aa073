//! Scatter phase
//!
//! Streams the record source to the awake slaves in round-robin batches.
//! Every batch travels over its own TCP connection to the slave's insert
//! port; the connection is closed once the batch is written.
//!
//! # Termination
//!
//! The phase ends the first time any batch comes up short (see
//! [`ScatterPolicy`]). With a source that is small relative to
//! `batch_size * slaves`, later slaves in the ring receive fewer batches or
//! none at all.

use crate::distributed::registry::Slave;
use crate::source::{RecordSource, SchemaDescription};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Largest batch buffer allocated for one read from the source
pub const MAX_BATCH_BYTES: usize = 1 << 30;

/// Errors that stop the scatter phase before any data is sent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScatterError {
    /// Slave has no insert port (its handshake failed or never ran)
    #[error("Slave {address} has no insert port; its daemon handshake did not assign one")]
    NotAwake { address: String },

    /// No daemon-capable slave in the registry
    #[error("No daemon-capable slaves to scatter records to")]
    NoIngestSlaves,

    /// Batch size must be at least one record
    #[error("Batch size must be at least 1 record")]
    EmptyBatch,

    /// `batch_size * record_size` exceeds [`MAX_BATCH_BYTES`]
    #[error(
        "Batch of {batch_size} records of {record_size} bytes exceeds {} bytes",
        MAX_BATCH_BYTES
    )]
    BatchTooLarge { batch_size: usize, record_size: usize },
}

/// When the scatter phase stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScatterPolicy {
    /// The first short batch (source exhausted) ends the phase for every
    /// slave. Slaves later in the ring are not topped up, so distribution is
    /// uneven when the source is short.
    #[default]
    FirstExhaustionEndsPhase,
}

/// Record source plus the schema read from its header
///
/// Created once at the start of the distribution phase and passed by
/// reference to the handshake and batch calls.
pub struct ScatterSession {
    source: RecordSource,
    schema: SchemaDescription,
}

impl ScatterSession {
    /// Read the schema header and take ownership of the source
    pub async fn begin(mut source: RecordSource) -> Result<Self> {
        let schema = source
            .read_schema()
            .await
            .context("Failed to read schema from record source")?;

        info!(
            name = schema.name().unwrap_or("-"),
            record_size = schema.record_size(),
            fields = schema.fields().len(),
            "Read schema"
        );

        Ok(Self { source, schema })
    }

    pub fn schema(&self) -> &SchemaDescription {
        &self.schema
    }

    pub fn record_size(&self) -> usize {
        self.schema.record_size()
    }

    /// Bytes in one full batch
    pub fn batch_bytes(&self, batch_size: usize) -> Result<usize, ScatterError> {
        if batch_size == 0 {
            return Err(ScatterError::EmptyBatch);
        }
        batch_size
            .checked_mul(self.record_size())
            .filter(|bytes| *bytes <= MAX_BATCH_BYTES)
            .ok_or(ScatterError::BatchTooLarge {
                batch_size,
                record_size: self.record_size(),
            })
    }
}

/// Result of one `send_to_slave` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub bytes_sent: u64,
    pub records_sent: u64,
    /// Source was exhausted during this call
    pub finished: bool,
}

/// Send up to `records_to_send` records to a slave, `batch_size` at a time
///
/// Opens one connection to the slave's insert port for the whole call. A
/// short read from the source writes what was read and reports `finished`.
pub async fn send_to_slave(
    session: &mut ScatterSession,
    slave: &Slave,
    batch_size: usize,
    records_to_send: usize,
) -> Result<BatchOutcome> {
    let endpoint = slave.insert_endpoint().ok_or_else(|| ScatterError::NotAwake {
        address: slave.address.clone(),
    })?;
    let batch_bytes = session.batch_bytes(batch_size)?;
    let record_size = session.record_size();

    debug!(%endpoint, "Connecting to slave");
    let mut stream = TcpStream::connect(&endpoint)
        .await
        .with_context(|| format!("Failed to connect to slave {}", endpoint))?;

    let mut buffer = vec![0u8; batch_bytes];
    let mut outcome = BatchOutcome {
        bytes_sent: 0,
        records_sent: 0,
        finished: false,
    };

    while (outcome.records_sent as usize) < records_to_send {
        let filled = session
            .source
            .fill(&mut buffer)
            .await
            .context("Failed to read from record source")?;

        if filled > 0 {
            stream
                .write_all(&buffer[..filled])
                .await
                .with_context(|| format!("Failed to send records to slave {}", endpoint))?;
        }

        outcome.bytes_sent += filled as u64;
        outcome.records_sent += (filled / record_size) as u64;

        if filled < batch_bytes {
            if filled % record_size != 0 {
                warn!(%endpoint, trailing = filled % record_size, "Record source ended mid-record");
            }
            outcome.finished = true;
            break;
        }
    }

    stream
        .shutdown()
        .await
        .with_context(|| format!("Failed to close connection to slave {}", endpoint))?;

    debug!(
        %endpoint,
        records = outcome.records_sent,
        bytes = outcome.bytes_sent,
        finished = outcome.finished,
        "Batch sent"
    );

    Ok(outcome)
}

/// One batch call made during the scatter phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCall {
    /// Index of the slave in the registry
    pub slave_index: usize,
    pub outcome: BatchOutcome,
}

/// Summary of a finished scatter phase
#[derive(Debug, Clone)]
pub struct ScatterReport {
    pub policy: ScatterPolicy,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Calls in the order they were made
    pub calls: Vec<BatchCall>,
}

impl ScatterReport {
    /// Registry indices targeted, in call order
    pub fn order(&self) -> Vec<usize> {
        self.calls.iter().map(|c| c.slave_index).collect()
    }

    pub fn total_bytes(&self) -> u64 {
        self.calls.iter().map(|c| c.outcome.bytes_sent).sum()
    }

    pub fn total_records(&self) -> u64 {
        self.calls.iter().map(|c| c.outcome.records_sent).sum()
    }

    /// Bytes received by the slave at registry index `index`
    pub fn bytes_for(&self, index: usize) -> u64 {
        self.calls
            .iter()
            .filter(|c| c.slave_index == index)
            .map(|c| c.outcome.bytes_sent)
            .sum()
    }
}

/// Registry indices of the slaves that take part in the scatter phase
///
/// Every daemon-capable slave must have been assigned an insert port.
pub fn ingest_ring(slaves: &[Slave]) -> Result<Vec<usize>, ScatterError> {
    let ring: Vec<usize> = slaves
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_daemon_capable())
        .map(|(i, _)| i)
        .collect();

    if ring.is_empty() {
        return Err(ScatterError::NoIngestSlaves);
    }

    if let Some(&idx) = ring.iter().find(|&&i| slaves[i].insert_port.is_none()) {
        return Err(ScatterError::NotAwake {
            address: slaves[idx].address.clone(),
        });
    }

    Ok(ring)
}

/// Scatter the rest of the record source across the ingest ring
pub async fn scatter(
    session: &mut ScatterSession,
    slaves: &[Slave],
    batch_size: usize,
    policy: ScatterPolicy,
) -> Result<ScatterReport> {
    let ring = ingest_ring(slaves)?;
    session.batch_bytes(batch_size)?;

    info!(slaves = ring.len(), batch_size, ?policy, "Initializing scattering");

    let started_at = Utc::now();
    let mut calls = Vec::new();
    let mut position = 0;

    loop {
        let slave_index = ring[position];
        let outcome = send_to_slave(session, &slaves[slave_index], batch_size, batch_size).await?;
        calls.push(BatchCall { slave_index, outcome });

        position = (position + 1) % ring.len();

        let done = match policy {
            ScatterPolicy::FirstExhaustionEndsPhase => outcome.finished,
        };
        if done {
            break;
        }
    }

    let report = ScatterReport {
        policy,
        started_at,
        finished_at: Utc::now(),
        calls,
    };

    info!(
        batches = report.calls.len(),
        records = report.total_records(),
        bytes = report.total_bytes(),
        source_bytes = session.source.bytes_read(),
        elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
        "Scattering finished"
    );
    for &idx in &ring {
        debug!(slave = %slaves[idx].address, bytes = report.bytes_for(idx), "Slave total");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::testing::{spawn_sink, unused_port};

    const RECORD_SIZE: usize = 4;

    /// Source with `records` 4-byte records numbered from 0
    async fn session_with(records: usize) -> ScatterSession {
        let mut data = b"name: t\nfield: v nc_var_uint_4\n\n".to_vec();
        for i in 0..records as u32 {
            data.extend_from_slice(&i.to_le_bytes());
        }
        ScatterSession::begin(RecordSource::new(std::io::Cursor::new(data)))
            .await
            .unwrap()
    }

    fn awake(port: u16) -> Slave {
        let mut slave = Slave::with_daemon("127.0.0.1", 1);
        slave.insert_port = Some(port);
        slave
    }

    #[tokio::test]
    async fn test_two_and_a_half_batches() {
        let sink = spawn_sink().await;
        let slave = awake(sink.port);
        let mut session = session_with(25).await;

        let mut finished = Vec::new();
        let mut last = None;
        for _ in 0..3 {
            let outcome = send_to_slave(&mut session, &slave, 10, 10).await.unwrap();
            finished.push(outcome.finished);
            last = Some(outcome);
        }

        assert_eq!(finished, vec![false, false, true]);
        let last = last.unwrap();
        assert_eq!(last.bytes_sent, (5 * RECORD_SIZE) as u64);
        assert_eq!(last.records_sent, 5);

        let received = sink.wait_for(3).await;
        let sizes: Vec<usize> = received.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![40, 40, 20]);
        assert_eq!(&received[2][..4], &20u32.to_le_bytes());
    }

    #[tokio::test]
    async fn test_exhausted_source_sends_nothing() {
        let sink = spawn_sink().await;
        let slave = awake(sink.port);
        let mut session = session_with(10).await;

        assert!(!send_to_slave(&mut session, &slave, 10, 10).await.unwrap().finished);
        let outcome = send_to_slave(&mut session, &slave, 10, 10).await.unwrap();
        assert!(outcome.finished);
        assert_eq!(outcome.bytes_sent, 0);

        let received = sink.wait_for(2).await;
        assert!(received[1].is_empty());
    }

    #[tokio::test]
    async fn test_multiple_batches_per_call() {
        let sink = spawn_sink().await;
        let slave = awake(sink.port);
        let mut session = session_with(100).await;

        let outcome = send_to_slave(&mut session, &slave, 10, 30).await.unwrap();
        assert_eq!(outcome.records_sent, 30);
        assert!(!outcome.finished);

        let received = sink.wait_for(1).await;
        assert_eq!(received[0].len(), 30 * RECORD_SIZE);
    }

    #[tokio::test]
    async fn test_round_robin_order() {
        let sinks = vec![spawn_sink().await, spawn_sink().await, spawn_sink().await];
        let slaves: Vec<Slave> = sinks.iter().map(|s| awake(s.port)).collect();
        let mut session = session_with(50).await;

        let report = scatter(&mut session, &slaves, 10, ScatterPolicy::default()).await.unwrap();

        assert_eq!(report.order(), vec![0, 1, 2, 0, 1, 2]);
        let finished: Vec<bool> = report.calls.iter().map(|c| c.outcome.finished).collect();
        assert_eq!(finished, vec![false, false, false, false, false, true]);
        assert_eq!(report.total_records(), 50);
        assert_eq!(report.bytes_for(0), 80);
        assert_eq!(report.bytes_for(2), 40);

        assert_eq!(sinks[0].wait_for(2).await.len(), 2);
        assert_eq!(sinks[1].wait_for(2).await.len(), 2);
        assert_eq!(sinks[2].wait_for(2).await[1].len(), 0);
    }

    #[tokio::test]
    async fn test_first_exhaustion_ends_phase_for_all() {
        let sinks = vec![spawn_sink().await, spawn_sink().await, spawn_sink().await];
        let slaves: Vec<Slave> = sinks.iter().map(|s| awake(s.port)).collect();
        let mut session = session_with(5).await;

        let report = scatter(&mut session, &slaves, 10, ScatterPolicy::default()).await.unwrap();

        assert_eq!(report.order(), vec![0]);
        assert_eq!(report.bytes_for(0), 20);
        assert_eq!(report.bytes_for(1), 0);
    }

    #[tokio::test]
    async fn test_query_only_slaves_not_in_ring() {
        let sink = spawn_sink().await;
        let slaves = vec![Slave::query_only("127.0.0.1", unused_port()), awake(sink.port)];
        let mut session = session_with(15).await;

        let report = scatter(&mut session, &slaves, 10, ScatterPolicy::default()).await.unwrap();
        assert_eq!(report.order(), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_unawake_slave_refused_before_sending() {
        let sink = spawn_sink().await;
        let slaves = vec![awake(sink.port), Slave::with_daemon("127.0.0.1", 1)];
        let mut session = session_with(15).await;

        let err = scatter(&mut session, &slaves, 10, ScatterPolicy::default()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScatterError>(),
            Some(&ScatterError::NotAwake { address: "127.0.0.1".to_string() })
        );
        assert!(sink.received().is_empty());

        let err = send_to_slave(&mut session, &slaves[1], 10, 10).await.unwrap_err();
        assert!(err.downcast_ref::<ScatterError>().is_some());
    }

    #[test]
    fn test_empty_ring() {
        let slaves = vec![Slave::query_only("127.0.0.1", 29512)];
        assert_eq!(ingest_ring(&slaves), Err(ScatterError::NoIngestSlaves));
    }

    #[tokio::test]
    async fn test_zero_batch_rejected() {
        let session = session_with(1).await;
        assert_eq!(session.batch_bytes(0), Err(ScatterError::EmptyBatch));
        assert_eq!(session.batch_bytes(3), Ok(12));
    }

    #[tokio::test]
    async fn test_oversized_batch_refused_before_connecting() {
        let sink = spawn_sink().await;
        let slaves = vec![awake(sink.port)];
        let source = RecordSource::new(std::io::Cursor::new(
            b"name: big\nrecord_size: 1000000000000000\n\n".to_vec(),
        ));
        let mut session = ScatterSession::begin(source).await.unwrap();

        let expected = ScatterError::BatchTooLarge {
            batch_size: 10_000,
            record_size: 1_000_000_000_000_000,
        };
        assert_eq!(session.batch_bytes(10_000), Err(expected.clone()));

        let err = scatter(&mut session, &slaves, 10_000, ScatterPolicy::default())
            .await
            .unwrap_err();
        assert_eq!(err.downcast_ref::<ScatterError>(), Some(&expected));
        assert!(sink.received().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_slave_is_fatal() {
        let slaves = vec![awake(unused_port())];
        let mut session = session_with(15).await;
        assert!(scatter(&mut session, &slaves, 10, ScatterPolicy::default()).await.is_err());
    }
}
