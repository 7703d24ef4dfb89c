//! Row Buffer with Flush Thresholds and Backpressure
//!
//! Accumulates appended rows in order and tracks row/byte totals against
//! the configured thresholds. Soft thresholds report flush readiness to
//! the channel's flush worker; hard caps reject appends with
//! `CapacityExceeded` so memory stays bounded while a flush is pending.
//!
//! `drain` is exclusive by construction: only the channel's flush worker
//! calls it, so at most one drain is in flight at a time.

use crate::config::FlushConfig;
use crate::error::IngestError;
use crate::row::{FlushUnit, Row};
use std::time::Instant;

/// In-order accumulator for one channel's unflushed rows
#[derive(Debug)]
pub struct RowBuffer {
    config: FlushConfig,
    rows: Vec<Row>,
    bytes: usize,
    /// When the oldest unflushed row was appended (max-latency trigger)
    first_append_at: Option<Instant>,
    /// Sequence number for the next flush unit; strictly increasing
    next_seq: u64,
}

impl RowBuffer {
    pub fn new(config: FlushConfig) -> Self {
        RowBuffer {
            rows: Vec::with_capacity(config.max_rows.min(4096)),
            bytes: 0,
            first_append_at: None,
            next_seq: 1,
            config,
        }
    }

    /// Append a row, failing with `CapacityExceeded` at the hard cap.
    /// The caller backs off and retries; the background flush will have
    /// drained the buffer in the meantime.
    pub fn append(&mut self, row: Row) -> Result<(), IngestError> {
        if self.rows.len() >= self.config.max_buffered_rows
            || self.bytes >= self.config.max_buffered_bytes
        {
            return Err(IngestError::CapacityExceeded {
                rows: self.rows.len(),
                bytes: self.bytes,
            });
        }
        if self.rows.is_empty() {
            self.first_append_at = Some(Instant::now());
        }
        self.bytes += row.size_bytes();
        self.rows.push(row);
        Ok(())
    }

    /// True once a soft threshold (row count or byte size) is reached
    pub fn flush_ready(&self) -> bool {
        self.rows.len() >= self.config.max_rows || self.bytes >= self.config.max_bytes
    }

    /// True once the oldest unflushed row has waited past max latency
    pub fn age_expired(&self) -> bool {
        self.first_append_at
            .map(|t| t.elapsed() >= self.config.max_latency)
            .unwrap_or(false)
    }

    /// Atomically remove the oldest rows as a new flush unit with the
    /// next sequence number. A unit holds at most one threshold's worth
    /// of rows (by count and by bytes), so a lagging flush never emits
    /// oversized units; callers drain in a loop until `None`. Sequence
    /// numbers are only consumed by non-empty drains.
    pub fn drain(&mut self) -> Option<FlushUnit> {
        if self.rows.is_empty() {
            return None;
        }
        let mut count = 0;
        let mut drained_bytes = 0;
        for row in &self.rows {
            count += 1;
            drained_bytes += row.size_bytes();
            if count >= self.config.max_rows || drained_bytes >= self.config.max_bytes {
                break;
            }
        }

        let remainder = self.rows.split_off(count);
        let rows = std::mem::replace(&mut self.rows, remainder);
        self.bytes -= drained_bytes;
        if self.rows.is_empty() {
            self.first_append_at = None;
        }
        // Remaining rows are newer than the drained ones; keeping the old
        // first-append timestamp can only flush them sooner, never later.

        let seq = self.next_seq;
        self.next_seq += 1;
        Some(FlushUnit::new(seq, rows))
    }

    /// Highest sequence number assigned so far (0 before the first drain)
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;
    use std::time::Duration;

    fn row(key: &str) -> Row {
        Row::new(key, vec![("c1".to_string(), Value::Str("x".repeat(10)))])
    }

    fn config(max_rows: usize) -> FlushConfig {
        FlushConfig {
            max_rows,
            max_buffered_rows: max_rows * 2,
            ..FlushConfig::test()
        }
    }

    #[test]
    fn test_flush_ready_at_row_threshold() {
        let mut buffer = RowBuffer::new(config(3));
        buffer.append(row("1")).unwrap();
        buffer.append(row("2")).unwrap();
        assert!(!buffer.flush_ready());
        buffer.append(row("3")).unwrap();
        assert!(buffer.flush_ready());
    }

    #[test]
    fn test_flush_ready_at_byte_threshold() {
        let mut buffer = RowBuffer::new(FlushConfig {
            max_rows: 1000,
            max_bytes: 20,
            ..FlushConfig::test()
        });
        buffer.append(row("1")).unwrap();
        assert!(!buffer.flush_ready());
        buffer.append(row("2")).unwrap();
        assert!(buffer.flush_ready());
    }

    #[test]
    fn test_capacity_exceeded_at_hard_cap() {
        let mut buffer = RowBuffer::new(config(2)); // hard cap 4
        for i in 1..=4 {
            buffer.append(row(&i.to_string())).unwrap();
        }
        match buffer.append(row("5")) {
            Err(IngestError::CapacityExceeded { rows, .. }) => assert_eq!(rows, 4),
            other => panic!("expected CapacityExceeded, got {:?}", other),
        }
        // Draining clears the backpressure
        buffer.drain().unwrap();
        buffer.append(row("5")).unwrap();
    }

    #[test]
    fn test_drain_assigns_increasing_seq_and_resets() {
        let mut buffer = RowBuffer::new(config(10));
        buffer.append(row("1")).unwrap();
        buffer.append(row("2")).unwrap();
        let unit = buffer.drain().unwrap();
        assert_eq!(unit.seq(), 1);
        assert_eq!(unit.row_count(), 2);
        assert_eq!(unit.last_key(), "2");
        assert!(buffer.is_empty());
        assert_eq!(buffer.bytes(), 0);

        buffer.append(row("3")).unwrap();
        let unit = buffer.drain().unwrap();
        assert_eq!(unit.seq(), 2);
        assert_eq!(buffer.last_seq(), 2);
    }

    #[test]
    fn test_drain_splits_backlog_at_row_threshold() {
        // A drain that lagged behind appends still emits threshold-sized
        // units, never one oversized unit.
        let mut buffer = RowBuffer::new(config(3)); // hard cap 6
        for i in 1..=6 {
            buffer.append(row(&i.to_string())).unwrap();
        }
        let sizes: Vec<usize> = std::iter::from_fn(|| buffer.drain())
            .map(|u| u.row_count())
            .collect();
        assert_eq!(sizes, vec![3, 3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_splits_at_byte_threshold() {
        let mut buffer = RowBuffer::new(FlushConfig {
            max_rows: 1000,
            max_bytes: 25,
            ..FlushConfig::test()
        });
        for i in 1..=3 {
            buffer.append(row(&i.to_string())).unwrap(); // 13 bytes each
        }
        let unit = buffer.drain().unwrap();
        assert_eq!(unit.row_count(), 2); // 26 bytes crosses the threshold
        let unit = buffer.drain().unwrap();
        assert_eq!(unit.row_count(), 1);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn test_drain_empty_consumes_no_seq() {
        let mut buffer = RowBuffer::new(config(10));
        assert!(buffer.drain().is_none());
        buffer.append(row("1")).unwrap();
        assert_eq!(buffer.drain().unwrap().seq(), 1);
    }

    #[test]
    fn test_age_expired() {
        let mut buffer = RowBuffer::new(FlushConfig {
            max_latency: Duration::from_millis(0),
            ..FlushConfig::test()
        });
        assert!(!buffer.age_expired());
        buffer.append(row("1")).unwrap();
        assert!(buffer.age_expired());
        buffer.drain();
        assert!(!buffer.age_expired());
    }
}
