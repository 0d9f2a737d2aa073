//! ncdistribute CLI entry point

use anyhow::{Context, Result};
use ncdistribute::config::{cli::Cli, validator, SessionConfig};
use ncdistribute::distributed::{load_hosts_file, Coordinator, GatherOutcome};
use ncdistribute::master::FanoutMaster;
use ncdistribute::source::RecordSource;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.debug);

    println!("ncdistribute v{}", env!("CARGO_PKG_VERSION"));
    println!("Record scatter and query gather");
    println!();

    let config = SessionConfig::resolve(&cli)?;
    validator::validate_config(&config).context("Configuration validation failed")?;

    // Unreadable hosts file ends the run before any network activity
    let slaves = load_hosts_file(&config.hosts_file)?;
    for slave in &slaves {
        info!("{}", slave);
    }

    if cli.dry_run {
        println!("{}", config);
        println!();
        println!("Slaves ({}):", slaves.len());
        for slave in &slaves {
            println!("  {}", slave);
        }
        println!();
        println!("Dry run mode - configuration validated successfully");
        return Ok(());
    }

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(async {
        let source = if config.query_only {
            None
        } else {
            Some(open_source(&config).await?)
        };

        let coordinator = Coordinator::new(Arc::new(config), slaves)?;
        let summary = coordinator.run(source, FanoutMaster::new).await?;

        if let Some(report) = summary.scatter {
            info!(
                batches = report.calls.len(),
                records = report.total_records(),
                bytes = report.total_bytes(),
                "Records distributed"
            );
        }

        match summary.gather {
            GatherOutcome::Served { port, attempts } => {
                info!(port, attempts, "Query front end stopped");
                Ok(())
            }
            GatherOutcome::Exhausted { attempts } => {
                warn!(attempts, "Query front end never started");
                anyhow::bail!("Query front end could not bind any of {} candidate ports", attempts)
            }
        }
    })
}

/// Install the console log subscriber
///
/// `RUST_LOG` wins over `--debug` when set.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Open the record stream named by the configuration
async fn open_source(config: &SessionConfig) -> Result<RecordSource> {
    match config.input {
        Some(ref path) => RecordSource::open(path)
            .await
            .with_context(|| format!("Failed to open input file: {}", path.display())),
        None => Ok(RecordSource::stdin()),
    }
}
