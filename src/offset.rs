//! Offset Tracking with Contiguous-Prefix Semantics
//!
//! Acknowledgements carry the flush unit's sequence number and last row
//! key. The tracker advances the committed frontier only across a gapless
//! prefix of sequence numbers: an ack for unit 5 while unit 4 is pending
//! parks in a min-heap until 4 arrives. Upload workers submit units in
//! order, so out-of-order acks should not happen; the heap keeps the
//! frontier correct even if they do.
//!
//! The frontier is published through a `tokio::sync::watch` cell: reads
//! never block, and close waiters await the frontier instead of polling.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// The committed frontier visible to callers
#[derive(Debug, Clone, Default)]
pub struct CommitFrontier {
    /// Highest sequence number in the acknowledged contiguous prefix
    /// (0 when nothing is committed)
    pub seq: u64,
    /// Row key of the newest committed row; the caller's offset token
    pub token: Option<Arc<str>>,
}

/// Acknowledgement parked until its sequence prefix completes
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct PendingAck {
    seq: u64,
    last_key: String,
}

#[derive(Debug)]
struct TrackerInner {
    /// Next sequence number the contiguous prefix is waiting for
    next_seq: u64,
    pending: BinaryHeap<Reverse<PendingAck>>,
}

/// Tracks acknowledged flush units and publishes the offset token
#[derive(Debug)]
pub struct OffsetTracker {
    inner: Mutex<TrackerInner>,
    tx: watch::Sender<CommitFrontier>,
}

impl Default for OffsetTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CommitFrontier::default());
        OffsetTracker {
            inner: Mutex::new(TrackerInner {
                next_seq: 1,
                pending: BinaryHeap::new(),
            }),
            tx,
        }
    }

    /// Record an acknowledged flush unit. Duplicate and already-committed
    /// sequence numbers are ignored, so replayed acks have no visible
    /// effect. Publishes a new frontier when the prefix advances.
    pub fn record(&self, seq: u64, last_key: &str) {
        let mut inner = self.inner.lock();
        if seq < inner.next_seq {
            debug!(seq, "ignoring duplicate ack below committed frontier");
            return;
        }
        inner.pending.push(Reverse(PendingAck {
            seq,
            last_key: last_key.to_string(),
        }));

        let mut advanced: Option<String> = None;
        while let Some(Reverse(top)) = inner.pending.peek() {
            if top.seq > inner.next_seq {
                break;
            }
            let Reverse(ack) = inner.pending.pop().expect("peeked entry present");
            if ack.seq == inner.next_seq {
                inner.next_seq += 1;
                advanced = Some(ack.last_key);
            }
            // seq below next_seq is a duplicate of a committed unit; drop it
        }

        if let Some(token) = advanced {
            let frontier = CommitFrontier {
                seq: inner.next_seq - 1,
                token: Some(Arc::from(token.as_str())),
            };
            drop(inner);
            debug!(seq = frontier.seq, token = %token, "commit frontier advanced");
            // send_replace publishes even while nobody subscribes;
            // plain send would drop the value without receivers.
            self.tx.send_replace(frontier);
        }
    }

    /// Current frontier; never blocks
    pub fn current(&self) -> CommitFrontier {
        self.tx.borrow().clone()
    }

    /// Current offset token; never blocks
    pub fn current_token(&self) -> Option<Arc<str>> {
        self.tx.borrow().token.clone()
    }

    /// Subscribe to frontier updates (used by close waiters)
    pub fn subscribe(&self) -> watch::Receiver<CommitFrontier> {
        self.tx.subscribe()
    }

    /// True once every unit up to `seq` is acknowledged
    pub fn committed_through(&self, seq: u64) -> bool {
        self.tx.borrow().seq >= seq
    }
}
