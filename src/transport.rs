//! Transport Abstraction
//!
//! The transport is the one network boundary of the core: it durably
//! persists a flush unit and returns an acknowledgement. The core is
//! transport-agnostic; a proprietary streaming protocol, HTTP, or a
//! queue all fit behind this trait.
//!
//! Implementations:
//! - `InMemoryTransport`: records delivered units; unit tests and the demo
//! - `FlakyTransport`: wraps another transport and injects scripted or
//!   seeded probabilistic failures for retry testing

use crate::row::FlushUnit;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Acknowledgement that a flush unit is durable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadAck {
    /// Sequence number of the acknowledged unit
    pub seq: u64,
    /// Key of the unit's last row
    pub last_key: String,
}

/// Error type for transport operations
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Recoverable failure (timeout, throttling, connection reset);
    /// the uploader retries with backoff
    Transient(String),
    /// Unrecoverable failure (auth rejection, schema mismatch);
    /// latches the channel into `Failed`
    Permanent(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Transient(msg) => write!(f, "transient transport error: {}", msg),
            TransportError::Permanent(msg) => write!(f, "permanent transport error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Future returned by transport sends
pub type SendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<UploadAck, TransportError>> + Send + 'a>>;

/// Durable persistence boundary for flush units
///
/// Guarantees required of implementations: an `Ok` ack means the unit is
/// durable, and a unit is never partially applied. Ordering across units
/// is enforced by the uploader, not here.
pub trait Transport: Send + Sync + 'static {
    /// Durably persist one flush unit and acknowledge it
    fn send<'a>(&'a self, unit: &'a FlushUnit) -> SendFuture<'a>;
}

// ============================================================================
// InMemoryTransport - for tests and the demo binary
// ============================================================================

/// In-memory transport that records every delivered unit
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    delivered: Mutex<Vec<FlushUnit>>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(InMemoryTransport::default())
    }

    /// Snapshot of delivered units, in delivery order
    pub fn delivered(&self) -> Vec<FlushUnit> {
        self.delivered.lock().clone()
    }

    /// Row counts of delivered units, in delivery order
    pub fn delivered_row_counts(&self) -> Vec<usize> {
        self.delivered.lock().iter().map(FlushUnit::row_count).collect()
    }

    /// Total rows across all delivered units
    pub fn delivered_rows(&self) -> usize {
        self.delivered.lock().iter().map(FlushUnit::row_count).sum()
    }
}

impl Transport for InMemoryTransport {
    fn send<'a>(&'a self, unit: &'a FlushUnit) -> SendFuture<'a> {
        Box::pin(async move {
            let ack = UploadAck {
                seq: unit.seq(),
                last_key: unit.last_key().to_string(),
            };
            self.delivered.lock().push(unit.clone());
            Ok(ack)
        })
    }
}

// ============================================================================
// FlakyTransport - fault injection wrapper
// ============================================================================

/// Statistics for injected faults
#[derive(Debug, Clone, Default)]
pub struct FlakyStats {
    pub attempts: u64,
    pub injected_transient: u64,
    pub injected_permanent: u64,
}

struct FlakyState {
    /// Errors returned before delegating to the inner transport,
    /// consumed front to back
    script: VecDeque<TransportError>,
    rng: StdRng,
    stats: FlakyStats,
}

/// Transport wrapper that injects failures ahead of a real transport
///
/// Two modes, composable: a scripted prefix of errors (deterministic
/// tests), and a seeded per-send transient failure probability
/// (chaos-style tests).
pub struct FlakyTransport<T: Transport> {
    inner: T,
    transient_prob: f64,
    state: Mutex<FlakyState>,
}

impl<T: Transport> FlakyTransport<T> {
    /// Fail the first `script.len()` sends with the given errors, then
    /// behave like the inner transport
    pub fn with_script(inner: T, script: Vec<TransportError>) -> Arc<Self> {
        Arc::new(FlakyTransport {
            inner,
            transient_prob: 0.0,
            state: Mutex::new(FlakyState {
                script: script.into(),
                rng: StdRng::seed_from_u64(0),
                stats: FlakyStats::default(),
            }),
        })
    }

    /// Fail each send with `transient_prob` probability, deterministically
    /// from the seed
    pub fn with_probability(inner: T, seed: u64, transient_prob: f64) -> Arc<Self> {
        Arc::new(FlakyTransport {
            inner,
            transient_prob,
            state: Mutex::new(FlakyState {
                script: VecDeque::new(),
                rng: StdRng::seed_from_u64(seed),
                stats: FlakyStats::default(),
            }),
        })
    }

    pub fn stats(&self) -> FlakyStats {
        self.state.lock().stats.clone()
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    fn next_injected_error(&self) -> Option<TransportError> {
        let mut state = self.state.lock();
        state.stats.attempts += 1;
        if let Some(err) = state.script.pop_front() {
            match err {
                TransportError::Transient(_) => state.stats.injected_transient += 1,
                TransportError::Permanent(_) => state.stats.injected_permanent += 1,
            }
            return Some(err);
        }
        if self.transient_prob > 0.0 && state.rng.gen_bool(self.transient_prob) {
            state.stats.injected_transient += 1;
            return Some(TransportError::Transient("injected fault".to_string()));
        }
        None
    }
}

impl<T: Transport> Transport for FlakyTransport<T> {
    fn send<'a>(&'a self, unit: &'a FlushUnit) -> SendFuture<'a> {
        Box::pin(async move {
            if let Some(err) = self.next_injected_error() {
                return Err(err);
            }
            self.inner.send(unit).await
        })
    }
}

impl<T: Transport> Transport for Arc<T> {
    fn send<'a>(&'a self, unit: &'a FlushUnit) -> SendFuture<'a> {
        (**self).send(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{Row, Value};

    fn unit(seq: u64, keys: &[&str]) -> FlushUnit {
        let rows = keys
            .iter()
            .map(|k| Row::new(*k, vec![("c1".to_string(), Value::Int(1))]))
            .collect();
        FlushUnit::new(seq, rows)
    }

    #[tokio::test]
    async fn test_in_memory_transport_acks_last_key() {
        let transport = InMemoryTransport::new();
        let ack = transport.send(&unit(1, &["1", "2", "3"])).await.unwrap();
        assert_eq!(ack, UploadAck { seq: 1, last_key: "3".to_string() });
        assert_eq!(transport.delivered_row_counts(), vec![3]);
    }

    #[tokio::test]
    async fn test_flaky_script_then_delegates() {
        let transport = FlakyTransport::with_script(
            InMemoryTransport::default(),
            vec![
                TransportError::Transient("t1".to_string()),
                TransportError::Transient("t2".to_string()),
            ],
        );
        let u = unit(1, &["1"]);
        assert!(transport.send(&u).await.is_err());
        assert!(transport.send(&u).await.is_err());
        assert!(transport.send(&u).await.is_ok());

        let stats = transport.stats();
        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.injected_transient, 2);
        assert_eq!(transport.inner().delivered_rows(), 1);
    }

    #[tokio::test]
    async fn test_flaky_probability_is_deterministic() {
        let run = |seed| async move {
            let transport =
                FlakyTransport::with_probability(InMemoryTransport::default(), seed, 0.5);
            let u = unit(1, &["1"]);
            let mut outcomes = Vec::new();
            for _ in 0..20 {
                outcomes.push(transport.send(&u).await.is_ok());
            }
            outcomes
        };
        assert_eq!(run(7).await, run(7).await);
    }
}
