//! Serial channels toward the controller.
//!
//! - **`reader`**: buffered reader shared by the frame decoder and payload reads
//! - **`writer`**: the single task that owns the outgoing side
//! - **`device`**: opening the configured devices

pub mod device;
pub mod reader;
pub mod writer;

pub use reader::SerialReader;
pub use writer::{SerialWriter, spawn_writer};
