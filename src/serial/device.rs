use anyhow::Context;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncWrite};

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Device name that selects the process stdin/stdout.
pub const STDIO_DEVICE: &str = "-";

/// Opens the controller channel.
///
/// A tty is opened twice, once per direction, so a pending read never holds
/// up a write. Line settings (baud rate, raw mode) are expected to be applied
/// to the device beforehand.
pub async fn open_command_channel(device: &str) -> anyhow::Result<(BoxedReader, BoxedWriter)> {
    if device == STDIO_DEVICE {
        return Ok((Box::new(tokio::io::stdin()), Box::new(tokio::io::stdout())));
    }

    let reader = OpenOptions::new()
        .read(true)
        .open(device)
        .await
        .with_context(|| format!("Failed to open {} for reading", device))?;
    let writer = OpenOptions::new()
        .write(true)
        .open(device)
        .await
        .with_context(|| format!("Failed to open {} for writing", device))?;

    Ok((Box::new(reader), Box::new(writer)))
}

/// Opens the debug channel that carries `reply` bodies.
///
/// Without a device the channel is permanently at end of stream.
pub async fn open_debug_channel(device: Option<&str>) -> anyhow::Result<BoxedReader> {
    match device {
        Some(path) => {
            let reader = OpenOptions::new()
                .read(true)
                .open(path)
                .await
                .with_context(|| format!("Failed to open debug channel {}", path))?;
            Ok(Box::new(reader))
        }
        None => Ok(Box::new(tokio::io::empty())),
    }
}
