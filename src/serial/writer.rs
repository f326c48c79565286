//! Single-writer task for the controller channel.
//!
//! Responses come from the serial task while poll-notices come from HTTP
//! workers. Both hand their bytes to one task through a channel so frames
//! never interleave on the wire.
//!
//! ```text
//! Dispatcher ──┐
//! Registry ────┴─► mpsc::Sender<Bytes> ─► writer task ─► serial device
//! ```

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::ResponseFrame;

/// Default queue depth between producers and the writer task.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Most queued chunks coalesced into one device write.
const MAX_BATCH: usize = 16;

/// Cloneable handle for queueing bytes to the controller.
#[derive(Debug, Clone)]
pub struct SerialWriter {
    tx: mpsc::Sender<Bytes>,
}

impl SerialWriter {
    /// Queues raw bytes.
    pub async fn send(&self, data: Bytes) -> anyhow::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        self.tx
            .send(data)
            .await
            .map_err(|_| anyhow::anyhow!("serial writer task has stopped"))
    }

    /// Queues an encoded response frame.
    pub async fn send_frame(&self, frame: &ResponseFrame) -> anyhow::Result<()> {
        tracing::trace!(?frame, "Response queued");
        self.send(frame.encode()).await
    }
}

/// Spawns the writer task draining into `device`.
///
/// The task ends when every [`SerialWriter`] has been dropped or the device
/// fails.
pub fn spawn_writer<W>(device: W, capacity: usize) -> (SerialWriter, JoinHandle<std::io::Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(writer_loop(device, rx));
    (SerialWriter { tx }, handle)
}

async fn writer_loop<W>(mut device: W, mut rx: mpsc::Receiver<Bytes>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH);

    while let Some(first) = rx.recv().await {
        batch.push(first);
        while batch.len() < MAX_BATCH {
            match rx.try_recv() {
                Ok(next) => batch.push(next),
                Err(_) => break,
            }
        }

        for chunk in batch.drain(..) {
            device.write_all(&chunk).await?;
        }
        device.flush().await?;
    }

    tracing::debug!("Serial writer finished");
    Ok(())
}
