use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default number of bytes requested from the device per read.
pub const DEFAULT_READ_CHUNK: usize = 256;

/// Buffered reader over a serial channel.
///
/// The frame decoder consumes bytes one at a time from the buffer while
/// handlers that need a payload (`send`, `reply`) take whole runs of bytes,
/// using whatever is already buffered before reading the device again.
pub struct SerialReader<R> {
    inner: R,
    pending: BytesMut,
    chunk: usize,
}

impl<R: AsyncRead + Unpin> SerialReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, DEFAULT_READ_CHUNK)
    }

    pub fn with_chunk_size(inner: R, chunk: usize) -> Self {
        let chunk = chunk.max(1);
        Self {
            inner,
            pending: BytesMut::with_capacity(chunk * 4),
            chunk,
        }
    }

    /// Reads the next chunk from the device. Returns 0 at end of stream.
    pub async fn fill(&mut self) -> std::io::Result<usize> {
        self.pending.reserve(self.chunk);
        self.inner.read_buf(&mut self.pending).await
    }

    /// Pops one buffered byte without touching the device.
    pub fn next_byte(&mut self) -> Option<u8> {
        if self.pending.has_remaining() {
            Some(self.pending.get_u8())
        } else {
            None
        }
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Drops everything buffered, returning how many bytes were dropped.
    pub fn discard_buffered(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Takes exactly `len` bytes, reading the device as often as needed.
    pub async fn read_exact_bytes(&mut self, len: usize) -> std::io::Result<Bytes> {
        while self.pending.len() < len {
            if self.fill().await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "serial channel closed",
                ));
            }
        }

        Ok(self.pending.split_to(len).freeze())
    }
}
