//! ncdistribute - record scatter and query gather across worker nodes
//!
//! ncdistribute takes a stream of fixed-size binary records (schema header
//! first), hands it out to a pool of slaves and then brings up a query front
//! end spanning those same slaves.
//!
//! # Architecture
//!
//! - **Slave registry**: hosts file with query-only and daemon-capable entries
//! - **Daemon handshake**: schema upload and per-session port negotiation
//! - **Scatter**: round-robin batches, one TCP connection per batch
//! - **Gather**: query front end bootstrap with bind retry over a port range

pub mod config;
pub mod distributed;
pub mod master;
pub mod source;

// Re-export commonly used types
pub use config::SessionConfig;
pub use distributed::{Coordinator, Slave};
pub use source::{RecordSource, SchemaDescription};

/// Result type used throughout ncdistribute
pub type Result<T> = anyhow::Result<T>;
