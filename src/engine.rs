//! The serial task.
//!
//! Reads the controller channel in chunks, feeds each byte to the frame
//! decoder, and hands complete frames to the dispatcher. Bytes outside any
//! frame are forwarded to the bridge socket before the next frame runs, so
//! ordering between raw data and commands is kept.

use anyhow::Context;
use tokio::io::AsyncRead;
use tracing::info;

use crate::bridge::Dispatcher;
use crate::net::Network;
use crate::protocol::FrameDecoder;
use crate::serial::SerialReader;

pub struct Engine<R, N, D> {
    input: SerialReader<R>,
    decoder: FrameDecoder,
    dispatcher: Dispatcher<N, D>,
}

impl<R, N, D> Engine<R, N, D>
where
    R: AsyncRead + Unpin,
    N: Network,
    D: AsyncRead + Unpin,
{
    pub fn new(input: SerialReader<R>, dispatcher: Dispatcher<N, D>) -> Self {
        Self {
            input,
            decoder: FrameDecoder::new(),
            dispatcher,
        }
    }

    /// Runs until the controller channel closes.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Serial engine started");

        loop {
            if self.input.buffered() == 0 {
                let n = self
                    .input
                    .fill()
                    .await
                    .context("failed to read controller channel")?;
                if n == 0 {
                    self.flush_passthrough().await;
                    info!("Controller channel closed");
                    return Ok(());
                }
            }

            while let Some(byte) = self.input.next_byte() {
                if let Some(frame) = self.decoder.push(byte) {
                    self.flush_passthrough().await;
                    self.dispatcher.dispatch(frame, &mut self.input).await?;
                }
            }

            self.flush_passthrough().await;
        }
    }

    async fn flush_passthrough(&mut self) {
        if let Some(data) = self.decoder.take_passthrough() {
            self.dispatcher.forward_passthrough(data).await;
        }
    }
}
