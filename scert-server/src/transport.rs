use async_trait::async_trait;
use bytes::BytesMut;
use scert_proto::{ProtocolError, ScertCodec, ScertMessage};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Write timeout")]
    Timeout,

    #[error("Transport closed")]
    Closed,
}

/// Write side of a connection as seen by the tick loop.
#[async_trait]
pub trait Transport: Send + Sync {
    fn peer_addr(&self) -> SocketAddr;

    fn is_writable(&self) -> bool;

    /// Encodes every message and writes them with a single flush
    async fn write_batch(&self, messages: &[ScertMessage]) -> Result<(), TransportError>;

    async fn close(&self);
}

/// TCP write half plus the codec used to frame outbound messages
pub struct TcpTransport {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    codec: ScertCodec,
    writable: AtomicBool,
    closed: CancellationToken,
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn new(
        writer: OwnedWriteHalf,
        peer: SocketAddr,
        codec: ScertCodec,
        write_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            writer: Mutex::new(writer),
            codec,
            writable: AtomicBool::new(true),
            closed: CancellationToken::new(),
            write_timeout,
        }
    }

    /// Cancelled once the transport is closed; the read loop selects on it
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    fn encode(&self, messages: &[ScertMessage]) -> BytesMut {
        let mut buf = BytesMut::new();
        for message in messages {
            if let Err(e) = self.codec.encode_into(message, &mut buf) {
                warn!(peer = %self.peer, "Dropping {}: {}", message, e);
            }
        }
        buf
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire)
    }

    async fn write_batch(&self, messages: &[ScertMessage]) -> Result<(), TransportError> {
        if !self.is_writable() {
            return Err(TransportError::Closed);
        }

        let buf = self.encode(messages);
        if buf.is_empty() {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        let result = timeout(self.write_timeout, async {
            writer.write_all(&buf).await?;
            writer.flush().await
        })
        .await;

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.writable.store(false, Ordering::Release);
                Err(e.into())
            }
            Err(_) => {
                self.writable.store(false, Ordering::Release);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn close(&self) {
        if !self.writable.swap(false, Ordering::AcqRel) && self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(peer = %self.peer, "Shutdown failed: {}", e);
        }
    }
}
