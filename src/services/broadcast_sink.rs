//! Broadcast sinks
//!
//! A sink is the endpoint the streaming worker pushes frames into. Writes may
//! block while the endpoint's buffer is full; that is the only backpressure the
//! worker sees.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn is_connected(&self) -> bool;

    /// Write one frame. A failed write leaves the sink disconnected.
    async fn stream_chunk(&self, chunk: &[u8]) -> Result<()>;

    /// Tell the endpoint that silence is being streamed
    async fn mute(&self, muted: bool);
}

/// Raw TCP transport, no handshake
pub struct TcpSink {
    addr: String,
    stream: Mutex<Option<TcpStream>>,
    muted: AtomicBool,
}

impl TcpSink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: Mutex::new(None),
            muted: AtomicBool::new(false),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BroadcastSink for TcpSink {
    async fn connect(&self) -> Result<()> {
        let mut stream = self.stream.lock().await;
        if stream.is_some() {
            return Ok(());
        }

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| AppError::SinkUnavailable(format!("{}: connect timed out", self.addr)))?
            .map_err(|e| AppError::SinkUnavailable(format!("{}: {}", self.addr, e)))?;
        connected.set_nodelay(true)?;

        info!("Connected to broadcast endpoint {}", self.addr);
        *stream = Some(connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.addr, e);
            }
            info!("Disconnected from broadcast endpoint {}", self.addr);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    async fn stream_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| AppError::SinkUnavailable(format!("{}: not connected", self.addr)))?;

        if let Err(e) = stream.write_all(chunk).await {
            warn!("Write to {} failed, dropping connection: {}", self.addr, e);
            *guard = None;
            return Err(AppError::SinkUnavailable(format!("{}: {}", self.addr, e)));
        }
        Ok(())
    }

    async fn mute(&self, muted: bool) {
        if self.muted.swap(muted, Ordering::Relaxed) != muted {
            debug!("Broadcast to {} {}", self.addr, if muted { "muted" } else { "unmuted" });
        }
    }
}
