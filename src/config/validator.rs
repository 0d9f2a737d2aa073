//! Configuration validation

use super::SessionConfig;
use anyhow::Result;

/// Validate a resolved session configuration
pub fn validate_config(config: &SessionConfig) -> Result<()> {
    if config.hosts_file.as_os_str().is_empty() {
        anyhow::bail!("hosts file path must not be empty");
    }

    if config.batch_size == 0 {
        anyhow::bail!("batch size must be at least 1 record");
    }

    if config.threads == 0 {
        anyhow::bail!("threads must be at least 1");
    }

    if config.query_port == 0 {
        anyhow::bail!("query port must be between 1 and 65535");
    }

    if config.query_only && config.input.is_some() {
        tracing::warn!(input = ?config.input, "Input is ignored in query-only mode");
    }

    Ok(())
}
