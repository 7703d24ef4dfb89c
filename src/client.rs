//! Ingestion Client: Channel Registry and Lifecycle
//!
//! A client owns the transport and a set of named channels. Channel
//! names are unique among open channels; a name is reusable once its
//! channel reached a terminal state. Closing the client closes every
//! open channel concurrently, waits for all of them, then releases the
//! transport.

use crate::channel::Channel;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::transport::Transport;
use crate::uploader::Uploader;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Lifecycle state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Active,
    Closed,
}

struct ClientInner {
    name: String,
    config: IngestConfig,
    uploader: Uploader,
    channels: Mutex<HashMap<String, Channel>>,
    closed: AtomicBool,
}

/// Handle to one ingestion client; cheap to clone, safe to share
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client over the given transport. The transport's
    /// connection pool is shared by all channels opened here.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: IngestConfig,
    ) -> Self {
        let name = name.into();
        let uploader = Uploader::new(transport, config.retry.clone());
        info!(client = %name, "client created");
        Client {
            inner: Arc::new(ClientInner {
                name,
                config,
                uploader,
                channels: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ClientState {
        if self.inner.closed.load(Ordering::Acquire) {
            ClientState::Closed
        } else {
            ClientState::Active
        }
    }

    /// Open a channel by name. Fails with `DuplicateChannel` while a
    /// channel of the same name is still open; the name is freed once
    /// that channel reaches a terminal state.
    pub fn open_channel(&self, name: &str) -> Result<Channel, IngestError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(IngestError::AlreadyClosed);
        }
        let mut channels = self.inner.channels.lock();
        if let Some(existing) = channels.get(name) {
            if !existing.status().state.is_terminal() {
                return Err(IngestError::DuplicateChannel(name.to_string()));
            }
        }
        let channel = Channel::spawn(
            name.to_string(),
            self.inner.config.flush.clone(),
            &self.inner.uploader,
        );
        channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    /// Number of channels currently registered (open or terminal)
    pub fn channel_count(&self) -> usize {
        self.inner.channels.lock().len()
    }

    /// Close every open channel concurrently and wait for all of them.
    /// Fails with `AlreadyClosed` on a second call; surfaces the first
    /// channel failure if any channel could not close cleanly.
    pub async fn close(&self) -> Result<(), IngestError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(IngestError::AlreadyClosed);
        }

        let channels: Vec<Channel> = {
            let mut map = self.inner.channels.lock();
            map.drain().map(|(_, c)| c).collect()
        };
        info!(client = %self.inner.name, channels = channels.len(), "closing client");

        let waits = channels.iter().map(|c| c.close().wait());
        let results = futures::future::join_all(waits).await;

        let mut first_error = None;
        for (channel, result) in channels.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    client = %self.inner.name,
                    channel = channel.name(),
                    error = %e,
                    "channel failed during client close"
                );
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(client = %self.inner.name, "client closed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelState;
    use crate::row::{Row, Value};
    use crate::transport::{FlakyTransport, InMemoryTransport, TransportError};

    fn row(key: &str) -> Row {
        Row::new(key, vec![("c1".to_string(), Value::Int(1))])
    }

    fn test_client(transport: Arc<dyn Transport>) -> Client {
        Client::new("test-client", transport, IngestConfig::test())
    }

    #[tokio::test]
    async fn test_duplicate_channel_rejected_while_open() {
        let client = test_client(InMemoryTransport::new());
        let _channel = client.open_channel("ch-1").unwrap();
        assert!(matches!(
            client.open_channel("ch-1"),
            Err(IngestError::DuplicateChannel(_))
        ));
        client.open_channel("ch-2").unwrap();
        assert_eq!(client.channel_count(), 2);
    }

    #[tokio::test]
    async fn test_channel_name_freed_after_close() {
        let client = test_client(InMemoryTransport::new());
        let channel = client.open_channel("ch-1").unwrap();
        channel.append(row("1")).unwrap();
        channel.close().wait().await.unwrap();

        let reopened = client.open_channel("ch-1").unwrap();
        assert_eq!(reopened.status().state, ChannelState::Open);
    }

    #[tokio::test]
    async fn test_close_drains_all_channels() {
        let transport = InMemoryTransport::new();
        let client = test_client(transport.clone());

        let a = client.open_channel("ch-a").unwrap();
        let b = client.open_channel("ch-b").unwrap();
        for i in 1..=30 {
            a.append(row(&format!("a{}", i))).unwrap();
            b.append(row(&format!("b{}", i))).unwrap();
        }

        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(a.status().state, ChannelState::Closed);
        assert_eq!(b.status().state, ChannelState::Closed);
        assert_eq!(transport.delivered_rows(), 60);
    }

    #[tokio::test]
    async fn test_double_close_fails() {
        let client = test_client(InMemoryTransport::new());
        client.close().await.unwrap();
        assert!(matches!(
            client.close().await,
            Err(IngestError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_open_after_close_fails() {
        let client = test_client(InMemoryTransport::new());
        client.close().await.unwrap();
        assert!(matches!(
            client.open_channel("ch-1"),
            Err(IngestError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_surfaces_channel_failure() {
        let transport = FlakyTransport::with_script(
            InMemoryTransport::default(),
            vec![TransportError::Permanent("credential expired".to_string())],
        );
        let client = test_client(transport);
        let channel = client.open_channel("ch-1").unwrap();
        channel.append(row("1")).unwrap();

        let err = client.close().await.unwrap_err();
        assert!(matches!(err, IngestError::Upload(_)));
        assert_eq!(channel.status().state, ChannelState::Failed);
    }
}
