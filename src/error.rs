//! Error Taxonomy for the Ingestion Core
//!
//! Three families of failure:
//! - Backpressure (`CapacityExceeded`): retryable, the caller backs off.
//! - Programmer errors (`ChannelClosed`, `AlreadyClosed`, `DuplicateChannel`,
//!   `MissingConfig`): non-retryable misuse of the API.
//! - Upload failures (`Upload`): transient failures are retried inside the
//!   uploader and never reach the caller; permanent failures latch the
//!   channel into `Failed` and surface here.

use std::io::Error as IoError;

/// Error type for upload operations against the transport
#[derive(Debug, Clone)]
pub enum UploadError {
    /// Transient failure; retried internally with backoff
    Transient(String),
    /// Permanent failure; the channel latches into `Failed`
    Permanent(String),
    /// Retry budget exhausted on transient failures
    RetriesExhausted { attempts: u32, last: String },
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Transient(msg) => write!(f, "transient upload error: {}", msg),
            UploadError::Permanent(msg) => write!(f, "permanent upload error: {}", msg),
            UploadError::RetriesExhausted { attempts, last } => {
                write!(f, "upload failed after {} attempts, last error: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for UploadError {}

impl UploadError {
    /// True for errors the uploader may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Transient(_))
    }
}

/// Error type for the caller-facing ingestion API
#[derive(Debug)]
pub enum IngestError {
    /// Row buffer is at its hard capacity; back off and retry the append
    CapacityExceeded { rows: usize, bytes: usize },
    /// Append or close on a channel that is no longer open
    ChannelClosed(String),
    /// Second close of an already-closed client
    AlreadyClosed,
    /// A channel with this name is already open on the client
    DuplicateChannel(String),
    /// A required configuration key is absent
    MissingConfig(String),
    /// Close did not complete within the deadline; the channel stays
    /// CLOSING and close may be retried
    CloseTimeout(String),
    /// Fatal upload failure surfaced from the uploader
    Upload(UploadError),
    /// I/O error reading configuration
    Io(IoError),
    /// Malformed configuration file
    InvalidConfig(String),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::CapacityExceeded { rows, bytes } => {
                write!(f, "row buffer at capacity ({} rows, {} bytes)", rows, bytes)
            }
            IngestError::ChannelClosed(name) => write!(f, "channel closed: {}", name),
            IngestError::AlreadyClosed => write!(f, "client already closed"),
            IngestError::DuplicateChannel(name) => {
                write!(f, "channel already open: {}", name)
            }
            IngestError::MissingConfig(key) => {
                write!(f, "missing required config key: {}", key)
            }
            IngestError::CloseTimeout(name) => {
                write!(f, "close timed out, channel still closing: {}", name)
            }
            IngestError::Upload(e) => write!(f, "upload error: {}", e),
            IngestError::Io(e) => write!(f, "I/O error: {}", e),
            IngestError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<UploadError> for IngestError {
    fn from(e: UploadError) -> Self {
        IngestError::Upload(e)
    }
}

impl From<IoError> for IngestError {
    fn from(e: IoError) -> Self {
        IngestError::Io(e)
    }
}

impl IngestError {
    /// True for errors the caller should back off and retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::CapacityExceeded { .. } | IngestError::CloseTimeout(_)
        )
    }
}
