use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::protocol::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Closed,
    Connecting,
    Open,
}

/// The single outbound TCP connection driven by the controller.
///
/// Every path that ends the connection goes through [`BridgeSocket::close`],
/// so later commands always observe `Closed`.
#[derive(Debug)]
pub struct BridgeSocket {
    stream: Option<TcpStream>,
    state: SocketState,
    peer: Option<SocketAddr>,
}

impl BridgeSocket {
    pub fn new() -> Self {
        Self {
            stream: None,
            state: SocketState::Closed,
            peer: None,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Opens a connection to `addr`, replacing any open one.
    pub async fn connect(&mut self, addr: SocketAddr, limit: Duration) -> anyhow::Result<()> {
        if self.is_open() {
            tracing::debug!(peer = ?self.peer, "Replacing open bridge socket");
            self.close();
        }

        self.state = SocketState::Connecting;
        let stream = match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.close();
                return Err(e.into());
            }
            Err(_) => {
                self.close();
                anyhow::bail!("connect to {} timed out", addr);
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle on bridge socket");
        }
        self.stream = Some(stream);
        self.peer = Some(addr);
        self.state = SocketState::Open;
        tracing::info!(peer = %addr, "Bridge socket open");
        Ok(())
    }

    /// Closes the connection. Returns false if it was already closed.
    pub fn close(&mut self) -> bool {
        let was_open = self.stream.take().is_some();
        if was_open {
            tracing::info!(peer = ?self.peer, "Bridge socket closed");
        }
        self.state = SocketState::Closed;
        self.peer = None;
        was_open
    }

    /// Writes all of `data`; a failed write closes the socket.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), ErrorCode> {
        let stream = self.stream.as_mut().ok_or(ErrorCode::InvalidState)?;

        let result = async {
            stream.write_all(data).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "Bridge socket write failed");
            self.close();
            return Err(ErrorCode::SendFailed);
        }
        Ok(())
    }

    /// Reads up to `max` bytes, waiting at most `limit`.
    ///
    /// A timeout yields an empty buffer. End of stream or a read error
    /// closes the socket.
    pub async fn read_some(&mut self, max: usize, limit: Duration) -> Result<Bytes, ErrorCode> {
        let stream = self.stream.as_mut().ok_or(ErrorCode::InvalidState)?;
        let mut buf = vec![0u8; max];

        match timeout(limit, stream.read(&mut buf)).await {
            Err(_) => Ok(Bytes::new()),
            Ok(Ok(0)) => {
                tracing::info!("Bridge socket closed by peer");
                self.close();
                Err(ErrorCode::Disconnected)
            }
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Bytes::from(buf))
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Bridge socket read failed");
                self.close();
                Err(ErrorCode::Disconnected)
            }
        }
    }
}

impl Default for BridgeSocket {
    fn default() -> Self {
        Self::new()
    }
}
