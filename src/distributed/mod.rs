//! Scatter/gather session implementation
//!
//! # Architecture
//!
//! One ncdistribute process drives a pool of slaves:
//!
//! - **Registry**: slaves listed in the hosts file, in round-robin order
//! - **Daemon handshake**: per daemon-capable slave, negotiates insert and query ports
//! - **Scatter**: streams record batches round-robin to the insert ports
//! - **Gather**: starts the query front end, moving up the port range on bind failure
//! - **Coordinator**: sequences the phases for one session
//!
//! # Modules
//!
//! - `registry`: hosts file parsing
//! - `protocol`: daemon reply format
//! - `daemon`: handshake client
//! - `scatter`: batch distributor
//! - `gather`: query front end bootstrap
//! - `coordinator`: session orchestration

pub mod coordinator;
pub mod daemon;
pub mod gather;
pub mod protocol;
pub mod registry;
pub mod scatter;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types
pub use coordinator::{Coordinator, SessionSummary};
pub use daemon::{wake_all, wake_slave};
pub use gather::{init_gather, FrontEndError, GatherOutcome, QueryFrontEnd, MAX_BIND_ATTEMPTS};
pub use protocol::{parse_daemon_reply, DaemonReply, ProtocolError};
pub use registry::{load_hosts_file, parse_hosts, RegistryError, Slave};
pub use scatter::{
    scatter, send_to_slave, BatchOutcome, ScatterError, ScatterPolicy, ScatterReport,
    ScatterSession,
};
