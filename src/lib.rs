//! Streaming Row Ingestion with Asynchronous Commit Confirmation
//!
//! Open a logical channel, append rows continuously, and let background
//! workers batch, upload, and confirm them. Callers learn about durable
//! progress through a monotonically advancing offset token: the key of
//! the newest row whose entire prefix of flush units is acknowledged.
//!
//! ## Architecture
//!
//! ```text
//! caller ──append──► Channel ──► RowBuffer ──► flush worker
//!                                                   │ (count / bytes / age)
//!                                              FlushUnit(seq)
//!                                                   │
//!                                            upload worker ──► Transport
//!                                                   │
//!                                   ack ──► OffsetTracker ──► offset token
//! ```
//!
//! ## Key guarantees
//!
//! - **Order**: flush-unit sequence numbers strictly increase per channel
//!   and units are uploaded one at a time, never reordered.
//! - **Contiguity**: the offset token only advances across a gapless
//!   acknowledged prefix, even if acks arrive out of order.
//! - **No silent loss**: every appended row is either covered by the
//!   offset token or the channel is failed with a reported error.
//! - **Backpressure**: appends fail fast with `CapacityExceeded` instead
//!   of buffering without bound; append never blocks on network I/O.

pub mod buffer;
pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod offset;
pub mod row;
pub mod transport;
pub mod uploader;

pub use channel::{Channel, ChannelState, ChannelStatus, CloseHandle};
pub use client::{Client, ClientState};
pub use config::{FlushConfig, IngestConfig, ProfileConfig, RetryConfig};
pub use error::{IngestError, UploadError};
pub use offset::{CommitFrontier, OffsetTracker};
pub use row::{FlushUnit, Row, Value};
pub use transport::{
    FlakyStats, FlakyTransport, InMemoryTransport, Transport, TransportError, UploadAck,
};
pub use uploader::Uploader;
