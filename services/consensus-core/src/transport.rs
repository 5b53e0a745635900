//! Point-to-point delivery of whole frames.
//!
//! One connection per message: the sender writes the frame and closes, the receiver reads to
//! EOF. Delivery is best effort; a failed send is logged by the caller and never retried.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

/// Upper bound on one inbound frame. Larger senders are cut off and their frame dropped.
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {source}")]
    Connect { addr: String, source: std::io::Error },
    #[error("write to {addr} failed: {source}")]
    Write { addr: String, source: std::io::Error },
    #[error("no endpoint registered at {0}")]
    Unreachable(String),
    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),
    #[error("frame exceeds {} bytes", MAX_FRAME_LEN)]
    FrameTooLarge,
}

/// Reads one frame to EOF, refusing to buffer more than [`MAX_FRAME_LEN`] bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: R) -> Result<Vec<u8>, TransportError> {
    let mut frame = Vec::new();
    reader
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_to_end(&mut frame)
        .await
        .map_err(TransportError::Read)?;
    if frame.len() > MAX_FRAME_LEN {
        return Err(TransportError::FrameTooLarge);
    }
    Ok(frame)
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, addr: &str, frame: Vec<u8>) -> Result<(), TransportError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, addr: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr: addr.to_string(), source })?;
        let write = |source| TransportError::Write { addr: addr.to_string(), source };
        stream.write_all(&frame).await.map_err(write)?;
        stream.shutdown().await.map_err(write)?;
        Ok(())
    }
}

/// In-process delivery keyed by address, for tests and embedded clusters.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    endpoints: RwLock<HashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MemoryTransport {
    pub fn new() -> Self { Self::default() }

    /// Registers `addr` and returns the receiving end of its inbox. Re-registering replaces the
    /// previous inbox.
    pub fn register(&self, addr: impl Into<String>) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.endpoints.write().insert(addr.into(), tx);
        rx
    }

    /// Drops the inbox at `addr`; later sends to it fail as unreachable.
    pub fn unregister(&self, addr: &str) { self.endpoints.write().remove(addr); }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, addr: &str, frame: Vec<u8>) -> Result<(), TransportError> {
        let tx = self.endpoints.read().get(addr).cloned();
        match tx {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::Unreachable(addr.to_string())),
            None => Err(TransportError::Unreachable(addr.to_string())),
        }
    }
}
