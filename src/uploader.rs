//! Uploader: Ordered Submission with Internal Retry
//!
//! Each channel gets one submit queue drained by a dedicated worker task
//! that sends flush units through the transport strictly one at a time,
//! so units for a channel are never reordered. Transient transport
//! failures are retried here with exponential backoff and jitter; the
//! caller only ever observes a delayed offset advance. Permanent failures
//! (and exhausted retry budgets) abort the worker, and the channel latches
//! into its failed state.
//!
//! ```text
//! flush worker ──► submit queue ──► upload worker ──► Transport
//!                                        │
//!                                        └──► ack ──► OffsetTracker
//! ```

use crate::config::RetryConfig;
use crate::error::UploadError;
use crate::offset::OffsetTracker;
use crate::row::FlushUnit;
use crate::transport::{Transport, TransportError, UploadAck};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Factory for per-channel upload workers; owns the shared transport
///
/// The transport's connection pool is shared across every channel of a
/// client, so no worker assumes exclusive access to it.
#[derive(Clone)]
pub struct Uploader {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
}

impl Uploader {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryConfig) -> Self {
        Uploader { transport, retry }
    }

    /// Spawn the ordered upload worker for one channel. The worker exits
    /// cleanly when the submit queue closes, or with the fatal error that
    /// aborted it.
    pub(crate) fn spawn_channel_worker(
        &self,
        channel: String,
        rx: mpsc::UnboundedReceiver<FlushUnit>,
        tracker: Arc<OffsetTracker>,
    ) -> JoinHandle<Result<(), UploadError>> {
        let transport = self.transport.clone();
        let retry = self.retry.clone();
        tokio::spawn(run_upload_worker(transport, retry, channel, rx, tracker))
    }
}

async fn run_upload_worker(
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    channel: String,
    mut rx: mpsc::UnboundedReceiver<FlushUnit>,
    tracker: Arc<OffsetTracker>,
) -> Result<(), UploadError> {
    let mut rng = jitter_rng(&channel);
    while let Some(unit) = rx.recv().await {
        debug!(
            channel = %channel,
            seq = unit.seq(),
            rows = unit.row_count(),
            bytes = unit.size_bytes(),
            "submitting flush unit"
        );
        let ack = send_with_retry(&*transport, &retry, &channel, &mut rng, &unit).await?;
        if ack.seq != unit.seq() {
            warn!(
                channel = %channel,
                sent = unit.seq(),
                acked = ack.seq,
                "transport echoed a mismatched sequence, trusting local unit"
            );
        }
        // The ack confirms delivery; the frontier advances by what we
        // actually sent, not by fields the transport chose to echo.
        tracker.record(unit.seq(), unit.last_key());
    }
    debug!(channel = %channel, "upload worker drained, exiting");
    Ok(())
}

/// Send one unit, absorbing transient failures with backoff.
/// The retry budget turns a persistent "transient" failure into
/// `RetriesExhausted` rather than retrying forever.
async fn send_with_retry(
    transport: &dyn Transport,
    retry: &RetryConfig,
    channel: &str,
    rng: &mut StdRng,
    unit: &FlushUnit,
) -> Result<UploadAck, UploadError> {
    let mut attempt: u32 = 0;
    loop {
        match transport.send(unit).await {
            Ok(ack) => {
                if attempt > 0 {
                    info!(
                        channel = %channel,
                        seq = unit.seq(),
                        attempts = attempt + 1,
                        "flush unit acknowledged after retries"
                    );
                }
                return Ok(ack);
            }
            Err(TransportError::Permanent(msg)) => {
                error!(channel = %channel, seq = unit.seq(), error = %msg, "permanent upload failure");
                return Err(UploadError::Permanent(msg));
            }
            Err(TransportError::Transient(msg)) => {
                attempt += 1;
                if attempt >= retry.max_attempts {
                    error!(
                        channel = %channel,
                        seq = unit.seq(),
                        attempts = attempt,
                        error = %msg,
                        "retry budget exhausted"
                    );
                    return Err(UploadError::RetriesExhausted {
                        attempts: attempt,
                        last: msg,
                    });
                }
                let delay = jittered(retry.backoff_for_attempt(attempt - 1), rng);
                warn!(
                    channel = %channel,
                    seq = unit.seq(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "transient upload failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Jitter RNG for one worker, seeded from the channel name: jitter is
/// reproducible for a given channel while distinct channels still draw
/// different factors and avoid backing off in lockstep.
fn jitter_rng(channel: &str) -> StdRng {
    let mut hasher = DefaultHasher::new();
    channel.hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}

/// Multiply a backoff delay by a 0.8..1.2 jitter factor so retrying
/// channels don't stampede the transport in lockstep
fn jittered(delay: Duration, rng: &mut StdRng) -> Duration {
    let factor: f64 = rng.gen_range(0.8..1.2);
    Duration::from_millis((delay.as_millis() as f64 * factor) as u64)
}
