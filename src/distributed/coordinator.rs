//! Session orchestration
//!
//! This module sequences one ncdistribute session:
//! - Wakes every daemon-capable slave (schema handshake)
//! - Waits for the slaves' insert servers to settle
//! - Scatters the record source across the awake slaves
//! - Starts the query front end across the slaves' query ports
//!
//! In query-only mode the first three steps are skipped and the query ports
//! come straight from the hosts file.

use crate::config::SessionConfig;
use crate::distributed::daemon::wake_all;
use crate::distributed::gather::{init_gather, GatherOutcome, QueryFrontEnd};
use crate::distributed::registry::Slave;
use crate::distributed::scatter::{
    ingest_ring, scatter, ScatterPolicy, ScatterReport, ScatterSession,
};
use crate::source::RecordSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::info;

/// What a finished session did
#[derive(Debug)]
pub struct SessionSummary {
    /// Scatter report; `None` in query-only mode
    pub scatter: Option<ScatterReport>,
    pub gather: GatherOutcome,
    /// Slaves as they stood when the front end was started
    pub slaves: Vec<Slave>,
}

/// Session coordinator
pub struct Coordinator {
    /// Session configuration
    config: Arc<SessionConfig>,

    /// Slaves in hosts-file order
    slaves: Vec<Slave>,
}

impl Coordinator {
    /// Create a new coordinator
    pub fn new(config: Arc<SessionConfig>, slaves: Vec<Slave>) -> Result<Self> {
        if slaves.is_empty() {
            anyhow::bail!("No slaves listed in {}", config.hosts_file.display());
        }

        Ok(Self { config, slaves })
    }

    /// Handshake with every daemon, then scatter the whole record source
    pub async fn distribute(&mut self, source: RecordSource) -> Result<ScatterReport> {
        let mut session = ScatterSession::begin(source).await?;
        session.batch_bytes(self.config.batch_size)?;

        let daemons = self.slaves.iter().filter(|s| s.is_daemon_capable()).count();
        info!(daemons, "Waking slaves");
        let awake = wake_all(&mut self.slaves, session.schema()).await?;
        info!(awake, daemons, "Daemon handshakes complete");

        // A rejected handshake ends the session without waiting to settle
        ingest_ring(&self.slaves)?;

        if !self.config.settle_delay().is_zero() {
            info!(delay_ms = self.config.settle_ms, "Waiting for slaves to settle");
            sleep(self.config.settle_delay()).await;
        }

        scatter(
            &mut session,
            &self.slaves,
            self.config.batch_size,
            ScatterPolicy::FirstExhaustionEndsPhase,
        )
        .await
    }

    /// Run the whole session
    ///
    /// `source` is only read outside query-only mode. `front_end` builds the
    /// query service from the slave list once the handshakes have assigned
    /// query ports.
    pub async fn run<F, M>(
        mut self,
        source: Option<RecordSource>,
        front_end: M,
    ) -> Result<SessionSummary>
    where
        F: QueryFrontEnd,
        M: FnOnce(&[Slave]) -> F,
    {
        let scatter = if self.config.query_only {
            info!("Query-only mode: skipping handshake and distribution");
            None
        } else {
            let source = source.context("A record source is required outside query-only mode")?;
            Some(self.distribute(source).await?)
        };

        let mut service = front_end(&self.slaves);
        let gather = init_gather(&mut service, self.config.query_port, self.config.threads).await;

        Ok(SessionSummary {
            scatter,
            gather,
            slaves: self.slaves,
        })
    }
}
