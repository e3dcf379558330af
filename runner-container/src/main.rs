use std::sync::Arc;

use anyhow::{Context, Result};
use batch_core::config::load_config;
use batch_core::telemetry::init_tracing;
use batch_core::{Batcher, Record, TracingLogger};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// This is the entry point for running a long-running batching job on container
/// hosting services like AWS EKS, ECS, etc.
///
/// What it does at a high-level:
///     Load config from the path given as the first argument, or from `BATCHER_CONFIG`.
///     Read newline-delimited records from stdin. A line is either `key<TAB>payload`
///     or a bare payload, keyed by its line number.
///     Batch and deliver them until stdin closes or a shutdown signal is received,
///     then drain what is left.
#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())
        .await
        .context("failed to load batcher config")?;

    let batcher = Batcher::from_config(&config, Arc::new(TracingLogger))?;
    batcher.start();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no: u64 = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                line_no += 1;
                if line.is_empty() {
                    continue;
                }
                if let Err(err) = batcher.add(parse_line(&line, line_no)) {
                    warn!(line = line_no, error = %err, "skipping record");
                }
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    let stopped = batcher.close(config.stop_timeout()).await;
    let metrics = batcher.metrics();
    info!(
        stopped,
        added = metrics.records_added,
        delivered = metrics.records_delivered,
        dropped = metrics.records_dropped,
        "batcher shut down"
    );

    if !stopped {
        warn!("runner did not stop within {:?}", config.stop_timeout());
    }
    Ok(())
}

fn parse_line(line: &str, line_no: u64) -> Record {
    match line.split_once('\t') {
        Some((key, payload)) => Record::new(key, payload.as_bytes().to_vec()),
        None => Record::new(line_no.to_string(), line.as_bytes().to_vec()),
    }
}
