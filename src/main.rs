//! Demo: ingest 100 000 synthetic rows through one channel and await
//! commit confirmation.
//!
//! Credentials come from `profile.json` (a flat JSON object of string
//! keys) when present; the demo itself runs against the in-memory
//! transport, so the profile only demonstrates the configuration
//! boundary. Completion is awaited on the close handle rather than
//! polled on a fixed schedule.

use rowpipe::{Client, IngestConfig, IngestError, InMemoryTransport, ProfileConfig, Row, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const PROFILE_PATH: &str = "profile.json";
const MAX_ROWS: u64 = 100_000;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);
const REQUIRED_PROFILE_KEYS: &[&str] = &["url", "user", "private_key"];

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "ingestion demo failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), IngestError> {
    if std::path::Path::new(PROFILE_PATH).exists() {
        let profile = ProfileConfig::from_json_file(PROFILE_PATH)?;
        profile.validate_required(REQUIRED_PROFILE_KEYS)?;
        info!(keys = profile.len(), "loaded connection profile");
    } else {
        info!("no profile.json found, continuing with in-memory transport");
    }

    let transport = InMemoryTransport::new();
    let client = Client::new(
        format!("demo-client-{:08x}", rand::random::<u32>()),
        transport.clone(),
        IngestConfig::default(),
    );
    let channel = client.open_channel("demo-channel")?;

    let started = std::time::Instant::now();
    for i in 1..=MAX_ROWS {
        let row_id = i.to_string();
        let row = Row::new(
            row_id.clone(),
            vec![
                ("c1".to_string(), Value::Int(i as i64)),
                ("c2".to_string(), Value::Str(row_id)),
                ("ts".to_string(), Value::Float(epoch_seconds())),
            ],
        );
        append_with_backoff(&channel, row).await?;
    }
    info!(
        rows = MAX_ROWS,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "all rows appended, waiting for commit confirmation"
    );

    let mut handle = channel.close();
    handle.wait_timeout(CLOSE_TIMEOUT).await?;

    let status = channel.status();
    info!(
        offset_token = status.offset_token.as_deref().unwrap_or(""),
        state = ?status.state,
        flush_units = transport.delivered().len(),
        "all data committed"
    );

    client.close().await?;
    info!("data ingestion completed");
    Ok(())
}

/// Append one row, backing off briefly on buffer backpressure
async fn append_with_backoff(channel: &rowpipe::Channel, row: Row) -> Result<(), IngestError> {
    loop {
        match channel.append(row.clone()) {
            Ok(()) => return Ok(()),
            Err(IngestError::CapacityExceeded { .. }) => {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
