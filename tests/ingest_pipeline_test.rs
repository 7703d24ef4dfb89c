//! End-to-End Ingestion Pipeline Tests
//!
//! Drives the full stack (client → channel → buffer → flush worker →
//! uploader → transport → offset tracker) through the scenarios the
//! design guarantees:
//! - full-drain commit: the final offset token equals the last row key
//! - close completes only after every appended row is acknowledged
//! - transient transport failures stay invisible to the caller
//! - flush units arrive sized and ordered by the configured thresholds

use rowpipe::{
    ChannelState, Client, FlakyTransport, FlushConfig, IngestConfig, IngestError,
    InMemoryTransport, RetryConfig, Row, TransportError, Value,
};

fn synthetic_row(i: u64) -> Row {
    let row_id = i.to_string();
    Row::new(
        row_id.clone(),
        vec![
            ("c1".to_string(), Value::Int(i as i64)),
            ("c2".to_string(), Value::Str(row_id)),
            ("ts".to_string(), Value::Float(1_700_000_000.0 + i as f64)),
        ],
    )
}

/// Append with a yield-based backoff loop, the way an embedding caller
/// handles `CapacityExceeded`
async fn append_all(channel: &rowpipe::Channel, count: u64) {
    for i in 1..=count {
        let row = synthetic_row(i);
        loop {
            match channel.append(row.clone()) {
                Ok(()) => break,
                Err(IngestError::CapacityExceeded { .. }) => tokio::task::yield_now().await,
                Err(e) => panic!("unexpected append error: {:?}", e),
            }
        }
    }
}

// ============================================================================
// Commit confirmation
// ============================================================================

#[tokio::test]
async fn test_hundred_thousand_rows_commit_to_final_token() {
    let transport = InMemoryTransport::new();
    let config = IngestConfig {
        flush: FlushConfig::rows(1000),
        retry: RetryConfig::test(),
    };
    let client = Client::new("bulk-client", transport.clone(), config);
    let channel = client.open_channel("bulk-channel").unwrap();

    append_all(&channel, 100_000).await;
    channel.close().wait().await.unwrap();

    let status = channel.status();
    assert_eq!(status.state, ChannelState::Closed);
    assert_eq!(status.offset_token.as_deref(), Some("100000"));
    assert_eq!(transport.delivered_rows(), 100_000);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_close_blocks_until_every_row_is_acked() {
    let transport = InMemoryTransport::new();
    let client = Client::new("client", transport.clone(), IngestConfig::test());
    let channel = client.open_channel("channel").unwrap();

    append_all(&channel, 500).await;
    channel.close().wait().await.unwrap();

    // Closed implies the token covers all 500 rows, not some prefix.
    assert_eq!(channel.status().offset_token.as_deref(), Some("500"));
    assert_eq!(transport.delivered_rows(), 500);
}

#[tokio::test]
async fn test_flush_units_sized_and_ordered_by_threshold() {
    let transport = InMemoryTransport::new();
    let config = IngestConfig {
        flush: FlushConfig::rows(10),
        retry: RetryConfig::test(),
    };
    let client = Client::new("client", transport.clone(), config);
    let channel = client.open_channel("channel").unwrap();

    append_all(&channel, 25).await;
    channel.close().wait().await.unwrap();

    assert_eq!(transport.delivered_row_counts(), vec![10, 10, 5]);
    let seqs: Vec<u64> = transport.delivered().iter().map(|u| u.seq()).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(transport.delivered().last().unwrap().last_key(), "25");
}

// ============================================================================
// Fault handling
// ============================================================================

#[tokio::test]
async fn test_transient_failures_invisible_to_caller() {
    // Transport fails the first two sends, then recovers. The caller
    // must observe no error at all, only a (delayed) token advance.
    let transport = FlakyTransport::with_script(
        InMemoryTransport::default(),
        vec![
            TransportError::Transient("connection reset".to_string()),
            TransportError::Transient("throttled".to_string()),
        ],
    );
    let config = IngestConfig {
        flush: FlushConfig::rows(5),
        retry: RetryConfig::test(),
    };
    let client = Client::new("client", transport.clone(), config);
    let channel = client.open_channel("channel").unwrap();

    append_all(&channel, 20).await;
    channel.close().wait().await.unwrap();

    assert_eq!(channel.status().offset_token.as_deref(), Some("20"));
    let stats = transport.stats();
    assert_eq!(stats.injected_transient, 2);
    assert_eq!(transport.inner().delivered_rows(), 20);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_chaos_faults_absorbed_by_retry() {
    // Seeded probabilistic faults on every send; retry must absorb all
    // of them and commit the full stream.
    let transport = FlakyTransport::with_probability(InMemoryTransport::default(), 42, 0.3);
    let config = IngestConfig {
        flush: FlushConfig::rows(50),
        // Deep retry budget so a streak of injected faults cannot
        // escalate to a permanent failure.
        retry: RetryConfig {
            max_attempts: 20,
            ..RetryConfig::test()
        },
    };
    let client = Client::new("chaos-client", transport.clone(), config);
    let channel = client.open_channel("chaos-channel").unwrap();

    append_all(&channel, 2_000).await;
    channel.close().wait().await.unwrap();

    assert_eq!(channel.status().offset_token.as_deref(), Some("2000"));
    assert_eq!(transport.inner().delivered_rows(), 2_000);
    assert!(transport.stats().injected_transient > 0, "chaos never fired");
}

// ============================================================================
// Multi-channel clients
// ============================================================================

#[tokio::test]
async fn test_channels_track_offsets_independently() {
    let transport = InMemoryTransport::new();
    let client = Client::new("client", transport.clone(), IngestConfig::test());
    let orders = client.open_channel("orders").unwrap();
    let events = client.open_channel("events").unwrap();

    append_all(&orders, 40).await;
    append_all(&events, 7).await;

    client.close().await.unwrap();

    assert_eq!(orders.status().offset_token.as_deref(), Some("40"));
    assert_eq!(events.status().offset_token.as_deref(), Some("7"));
    assert_eq!(transport.delivered_rows(), 47);
}
