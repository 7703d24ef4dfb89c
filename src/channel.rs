//! Ingestion Channel: State Machine and Flush Worker
//!
//! A channel is the public handle for one append-only ingestion stream.
//! Appends land in the row buffer without touching the network; a flush
//! worker task drains the buffer into flush units when a threshold fires
//! and hands them to the channel's upload worker in sequence order.
//!
//! ```text
//! append ──► RowBuffer ──► flush worker ──► submit queue ──► uploader
//!                              │
//!                     (count / bytes / age)
//! ```
//!
//! ## State machine
//!
//! ```text
//! Open ──close()──► Closing ──all units acked──► Closed
//!   │
//!   └──permanent upload failure──► Failed (terminal, error latched)
//! ```
//!
//! The state lives in a watch cell. The flush worker observes the
//! transition out of Open and performs the final drain; the close handle
//! suspends on the same cell until a terminal state, with optional
//! timeout, instead of polling.

use crate::buffer::RowBuffer;
use crate::config::FlushConfig;
use crate::error::{IngestError, UploadError};
use crate::offset::OffsetTracker;
use crate::row::{FlushUnit, Row};
use crate::uploader::Uploader;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Accepting appends
    Open,
    /// Close requested; draining and awaiting acknowledgements
    Closing,
    /// All appended rows acknowledged; terminal
    Closed,
    /// Permanent upload failure latched; terminal, error surfaced
    Failed,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Failed)
    }
}

/// Snapshot returned by `Channel::status`; never blocks
#[derive(Debug, Clone)]
pub struct ChannelStatus {
    /// Key of the newest row whose full prefix is durably committed
    pub offset_token: Option<Arc<str>>,
    pub state: ChannelState,
}

/// Shared error slot latched by a permanent upload failure
type FatalSlot = Arc<RwLock<Option<UploadError>>>;

struct ChannelShared {
    name: String,
    buffer: Arc<Mutex<RowBuffer>>,
    state_tx: Arc<watch::Sender<ChannelState>>,
    fatal: FatalSlot,
    flush_tx: mpsc::UnboundedSender<()>,
    tracker: Arc<OffsetTracker>,
}

/// Handle to one ingestion channel; cheap to clone, safe to share
/// across tasks
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    /// Wire up the buffer, flush worker, and upload worker for a new
    /// channel. Called by `Client::open_channel`.
    pub(crate) fn spawn(name: String, flush: FlushConfig, uploader: &Uploader) -> Channel {
        let tracker = Arc::new(OffsetTracker::new());
        let buffer = Arc::new(Mutex::new(RowBuffer::new(flush.clone())));
        let fatal: FatalSlot = Arc::new(RwLock::new(None));
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let state_tx = Arc::new(watch::channel(ChannelState::Open).0);

        let upload_worker =
            uploader.spawn_channel_worker(name.clone(), submit_rx, tracker.clone());

        let worker = FlushWorker {
            name: name.clone(),
            buffer: buffer.clone(),
            max_latency: flush.max_latency,
            rx: flush_rx,
            state_rx: state_tx.subscribe(),
            submit_tx,
        };
        tokio::spawn(worker.run());
        tokio::spawn(finalize(
            name.clone(),
            state_tx.clone(),
            fatal.clone(),
            tracker.clone(),
            upload_worker,
        ));

        info!(channel = %name, "channel opened");
        Channel {
            shared: Arc::new(ChannelShared {
                name,
                buffer,
                state_tx,
                fatal,
                flush_tx,
                tracker,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Append one row. Never blocks on network I/O; fails with
    /// `CapacityExceeded` under backpressure (retry after backing off)
    /// and `ChannelClosed` once the channel left the open state.
    pub fn append(&self, row: Row) -> Result<(), IngestError> {
        // State is re-checked under the buffer lock so no append can
        // slip in after the closing drain.
        let flush_ready = {
            let mut buffer = self.shared.buffer.lock();
            match *self.shared.state_tx.borrow() {
                ChannelState::Open => {}
                ChannelState::Failed => return Err(self.latched_error()),
                _ => return Err(IngestError::ChannelClosed(self.shared.name.clone())),
            }
            buffer.append(row)?;
            buffer.flush_ready()
        };
        if flush_ready {
            let _ = self.shared.flush_tx.send(());
        }
        Ok(())
    }

    /// Current offset token and state; non-blocking
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            offset_token: self.shared.tracker.current_token(),
            state: *self.shared.state_tx.borrow(),
        }
    }

    /// Request close. Idempotent; each call returns a handle that
    /// completes when the channel reaches a terminal state. All rows
    /// appended before the close are flushed and acknowledged first.
    pub fn close(&self) -> CloseHandle {
        let initiated = self.shared.state_tx.send_if_modified(|state| {
            if *state == ChannelState::Open {
                *state = ChannelState::Closing;
                true
            } else {
                false
            }
        });
        if initiated {
            debug!(channel = %self.shared.name, "close requested");
        }
        CloseHandle {
            state_rx: self.shared.state_tx.subscribe(),
            shared: self.shared.clone(),
        }
    }

    fn latched_error(&self) -> IngestError {
        self.shared
            .fatal
            .read()
            .clone()
            .map(IngestError::Upload)
            .unwrap_or_else(|| IngestError::ChannelClosed(self.shared.name.clone()))
    }
}

/// Completion handle returned by `Channel::close`
pub struct CloseHandle {
    state_rx: watch::Receiver<ChannelState>,
    shared: Arc<ChannelShared>,
}

impl CloseHandle {
    /// Suspend until the channel is closed. Returns the latched upload
    /// error if the channel failed instead.
    pub async fn wait(mut self) -> Result<(), IngestError> {
        self.wait_inner().await
    }

    /// Like `wait`, but gives up after `timeout`. On timeout the channel
    /// stays CLOSING and the handle may be waited on again.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<(), IngestError> {
        match tokio::time::timeout(timeout, self.wait_inner()).await {
            Ok(result) => result,
            Err(_) => Err(IngestError::CloseTimeout(self.shared.name.clone())),
        }
    }

    async fn wait_inner(&mut self) -> Result<(), IngestError> {
        let state = *self
            .state_rx
            .wait_for(ChannelState::is_terminal)
            .await
            .map_err(|_| IngestError::ChannelClosed(self.shared.name.clone()))?;
        match state {
            ChannelState::Failed => Err(self
                .shared
                .fatal
                .read()
                .clone()
                .map(IngestError::Upload)
                .unwrap_or_else(|| IngestError::ChannelClosed(self.shared.name.clone()))),
            _ => Ok(()),
        }
    }

    /// Channel status, for callers that prefer to poll
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus {
            offset_token: self.shared.tracker.current_token(),
            state: *self.state_rx.borrow(),
        }
    }
}

// ============================================================================
// FlushWorker - drains the buffer when a threshold fires
// ============================================================================

/// Per-channel actor deciding when a buffer becomes a flush unit.
/// Exclusive owner of `drain`, so at most one drain is in flight.
struct FlushWorker {
    name: String,
    buffer: Arc<Mutex<RowBuffer>>,
    max_latency: Duration,
    /// Threshold nudges from the append path
    rx: mpsc::UnboundedReceiver<()>,
    /// Observes the transition out of Open for the final drain
    state_rx: watch::Receiver<ChannelState>,
    submit_tx: mpsc::UnboundedSender<FlushUnit>,
}

impl FlushWorker {
    async fn run(mut self) {
        // Tick well under the latency bound so an aged buffer is caught
        // close to its deadline.
        let period = Duration::from_millis((self.max_latency.as_millis() as u64 / 4).max(1));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(()) => {
                        if !self.flush(false) {
                            break;
                        }
                    }
                    // All channel handles dropped: flush what remains
                    // and let the upload worker wind down.
                    None => {
                        self.flush(true);
                        break;
                    }
                },
                changed = self.state_rx.changed() => {
                    // Any state out of Open ends this worker; the final
                    // drain covers every row appended before the state
                    // changed. Dropping the submit queue afterwards lets
                    // the upload worker finish and exit.
                    if changed.is_err() || *self.state_rx.borrow() != ChannelState::Open {
                        self.flush(true);
                        break;
                    }
                }
                _ = tick.tick() => {
                    if !self.flush(false) {
                        break;
                    }
                }
            }
        }
        debug!(channel = %self.name, "flush worker stopping");
    }

    /// Drain and submit while a threshold holds (or until empty when
    /// forced); each drain yields at most one threshold-sized unit.
    /// Returns false once the upload worker is gone.
    fn flush(&self, force: bool) -> bool {
        loop {
            let unit = {
                let mut buffer = self.buffer.lock();
                if force || buffer.flush_ready() || buffer.age_expired() {
                    buffer.drain()
                } else {
                    None
                }
            };
            match unit {
                Some(unit) => {
                    debug!(
                        channel = %self.name,
                        seq = unit.seq(),
                        rows = unit.row_count(),
                        "flush unit drained"
                    );
                    if self.submit_tx.send(unit).is_err() {
                        return false;
                    }
                }
                None => return true,
            }
        }
    }
}

/// Await the upload worker and publish the channel's terminal state.
/// The worker exits Ok only after the submit queue closed and every
/// submitted unit was acknowledged.
async fn finalize(
    name: String,
    state_tx: Arc<watch::Sender<ChannelState>>,
    fatal: FatalSlot,
    tracker: Arc<OffsetTracker>,
    upload_worker: JoinHandle<Result<(), UploadError>>,
) {
    let result = match upload_worker.await {
        Ok(result) => result,
        Err(e) => Err(UploadError::Permanent(format!("upload worker panicked: {}", e))),
    };
    match result {
        Ok(()) => {
            let token = tracker.current_token();
            info!(
                channel = %name,
                offset_token = token.as_deref().unwrap_or(""),
                "channel closed"
            );
            state_tx.send_replace(ChannelState::Closed);
        }
        Err(e) => {
            error!(channel = %name, error = %e, "channel failed");
            *fatal.write() = Some(e);
            // The watch transition also stops the flush worker.
            state_tx.send_replace(ChannelState::Failed);
        }
    }
}
