//! Gather phase bootstrap
//!
//! Brings up the query front end across the slaves. Port contention is
//! handled by walking a bounded sequence of candidate ports starting at the
//! configured query port: the first candidate the front end manages to start
//! on wins, and a failed candidate is never revisited.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Number of ports tried before giving up
pub const MAX_BIND_ATTEMPTS: u16 = 100;

/// Errors reported by a query front end when it cannot start
#[derive(Error, Debug)]
pub enum FrontEndError {
    /// Listening socket could not be bound
    #[error("Failed to bind query port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Any other start-up failure
    #[error("Query front end failed to initialize on port {port}: {reason}")]
    Init { port: u16, reason: String },
}

/// Query/aggregation service spanning the slaves
#[async_trait]
pub trait QueryFrontEnd: Send {
    /// Start serving on `port` with `threads` concurrent request handlers
    ///
    /// Normally only returns once the service shuts down. Returns an error
    /// without serving when the port cannot be used.
    async fn start(&mut self, port: u16, threads: usize) -> Result<(), FrontEndError>;
}

/// How the bootstrap ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    /// Front end ran on `port`; `attempts` counts the successful one
    Served { port: u16, attempts: usize },

    /// Every candidate failed; the front end never started
    Exhausted { attempts: usize },
}

/// Candidate ports: `base, base + 1, ...`, at most [`MAX_BIND_ATTEMPTS`]
///
/// The sequence stops early rather than wrapping past `u16::MAX`.
pub fn candidate_ports(base: u16) -> impl Iterator<Item = u16> {
    (0..MAX_BIND_ATTEMPTS).map_while(move |offset| base.checked_add(offset))
}

/// Start the front end on the first usable candidate port
///
/// Start-up failures are logged and never escape; exhausting the candidates
/// is reported through [`GatherOutcome::Exhausted`].
pub async fn init_gather<F>(front_end: &mut F, base_port: u16, threads: usize) -> GatherOutcome
where
    F: QueryFrontEnd + ?Sized,
{
    info!(base_port, threads, "Initializing gathering");

    let mut attempts = 0;
    for port in candidate_ports(base_port) {
        attempts += 1;
        info!(port, attempt = attempts, "Starting query front end");

        match front_end.start(port, threads).await {
            Ok(()) => {
                info!(port, "Gathering finished");
                return GatherOutcome::Served { port, attempts };
            }
            Err(e) => warn!(port, error = %e, "Query front end did not start"),
        }
    }

    warn!(attempts, base_port, "Query front end could not start on any candidate port");
    GatherOutcome::Exhausted { attempts }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Front end that fails on every port below `succeed_from`
    struct ScriptedFrontEnd {
        succeed_from: Option<u16>,
        attempts: Vec<(u16, usize)>,
    }

    impl ScriptedFrontEnd {
        fn new(succeed_from: Option<u16>) -> Self {
            Self {
                succeed_from,
                attempts: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl QueryFrontEnd for ScriptedFrontEnd {
        async fn start(&mut self, port: u16, threads: usize) -> Result<(), FrontEndError> {
            self.attempts.push((port, threads));
            match self.succeed_from {
                Some(p) if port >= p => Ok(()),
                _ => Err(FrontEndError::Bind {
                    port,
                    source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_served_after_two_failures() {
        let mut front_end = ScriptedFrontEnd::new(Some(29514));

        let outcome = init_gather(&mut front_end, 29512, 10).await;

        assert_eq!(outcome, GatherOutcome::Served { port: 29514, attempts: 3 });
        assert_eq!(front_end.attempts, vec![(29512, 10), (29513, 10), (29514, 10)]);
    }

    #[tokio::test]
    async fn test_first_port_succeeds() {
        let mut front_end = ScriptedFrontEnd::new(Some(0));
        let outcome = init_gather(&mut front_end, 4000, 2).await;
        assert_eq!(outcome, GatherOutcome::Served { port: 4000, attempts: 1 });
    }

    #[tokio::test]
    async fn test_exhausted_after_hundred_attempts() {
        let mut front_end = ScriptedFrontEnd::new(None);

        let outcome = init_gather(&mut front_end, 29512, 10).await;

        assert_eq!(outcome, GatherOutcome::Exhausted { attempts: 100 });
        assert_eq!(front_end.attempts.len(), 100);
        assert_eq!(front_end.attempts.last().map(|a| a.0), Some(29611));
    }

    #[test]
    fn test_candidates_stop_at_port_range_end() {
        let ports: Vec<u16> = candidate_ports(u16::MAX - 2).collect();
        assert_eq!(ports, vec![u16::MAX - 2, u16::MAX - 1, u16::MAX]);
        assert_eq!(candidate_ports(1000).count(), 100);
    }

    #[tokio::test]
    async fn test_init_failure_also_retried() {
        struct FailOnce(bool);

        #[async_trait]
        impl QueryFrontEnd for FailOnce {
            async fn start(&mut self, port: u16, _threads: usize) -> Result<(), FrontEndError> {
                if !self.0 {
                    self.0 = true;
                    return Err(FrontEndError::Init { port, reason: "not ready".to_string() });
                }
                Ok(())
            }
        }

        let mut front_end = FailOnce(false);
        let outcome = init_gather(&mut front_end, 7000, 1).await;
        assert_eq!(outcome, GatherOutcome::Served { port: 7001, attempts: 2 });
    }
}
