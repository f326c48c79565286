//! Serial command protocol.
//!
//! The controller and the host share one serial line that carries both
//! command frames and raw passthrough data:
//!
//! ```text
//! controller -> host   0xFE <opcode | NAME:> <params> \r
//! host -> controller   0xFE '=' S,<value> \r
//!                      0xFE '=' E,<code> \r
//!                      0xFE '=' S,<text> \r
//!                      0xFE '=' <G|P|N>:<handle>,<id> \r
//! ```
//!
//! - **`opcode`**: raw opcode bytes and the mnemonic table
//! - **`codec`**: the byte-at-a-time frame decoder
//! - **`response`**: response frames and error codes

pub mod codec;
pub mod opcode;
pub mod response;

pub use codec::{CommandFrame, FrameDecoder};
pub use opcode::Opcode;
pub use response::{ErrorCode, NoticeKind, ResponseFrame};
