use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::opcode::{
    END_BYTE, MAX_MNEMONIC_LEN, MIN_OPCODE, Opcode, START_BYTE, resolve_mnemonic,
};

/// Largest opcode + params payload a frame may carry.
pub const MAX_FRAME_LEN: usize = 1024;

/// One complete controller-to-host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Raw opcode byte; 0 for an empty frame.
    pub opcode: u8,
    /// Everything between the opcode and CR.
    pub params: String,
}

impl CommandFrame {
    fn from_bytes(bytes: &[u8]) -> Self {
        match bytes.split_first() {
            Some((&opcode, params)) => Self {
                opcode,
                params: String::from_utf8_lossy(params).into_owned(),
            },
            None => Self {
                opcode: 0,
                params: String::new(),
            },
        }
    }

    /// The operation named by this frame, if it is one the dispatcher knows.
    pub fn op(&self) -> Option<Opcode> {
        if self.opcode < MIN_OPCODE {
            return None;
        }
        Opcode::from_byte(self.opcode)
    }

    pub fn is_empty(&self) -> bool {
        self.opcode == 0 && self.params.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Bytes belong to the raw data pipe.
    Passthrough,
    /// Inside a frame, collecting opcode and params.
    Capture,
    /// Collecting a mnemonic name up to `:`.
    Mnemonic,
    /// Skipping the rest of an oversized frame until CR.
    Discard,
}

/// Splits the serial byte stream into command frames and passthrough data.
///
/// Feed bytes one at a time with [`FrameDecoder::push`]. Bytes outside a
/// frame are kept until [`FrameDecoder::take_passthrough`] drains them.
pub struct FrameDecoder {
    state: State,
    frame: BytesMut,
    mnemonic: BytesMut,
    passthrough: BytesMut,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            state: State::Passthrough,
            frame: BytesMut::with_capacity(max_frame_len),
            mnemonic: BytesMut::with_capacity(MAX_MNEMONIC_LEN),
            passthrough: BytesMut::with_capacity(256),
            max_frame_len,
        }
    }

    /// Consumes one byte, returning a frame when it completes one.
    pub fn push(&mut self, byte: u8) -> Option<CommandFrame> {
        if byte == START_BYTE {
            if self.state != State::Passthrough {
                tracing::debug!(discarded = self.frame.len(), "Frame restarted");
            }
            self.reset();
            self.state = State::Capture;
            return None;
        }

        match self.state {
            State::Passthrough => {
                self.passthrough.put_u8(byte);
                None
            }

            State::Discard => {
                if byte == END_BYTE {
                    self.state = State::Passthrough;
                }
                None
            }

            State::Capture => {
                if byte == END_BYTE {
                    return Some(self.finish());
                }

                if self.frame.is_empty() && byte.is_ascii_alphabetic() {
                    self.mnemonic.put_u8(byte);
                    self.state = State::Mnemonic;
                    return None;
                }

                self.put_frame_byte(byte);
                None
            }

            State::Mnemonic => {
                if byte == b':' {
                    match resolve_mnemonic(&self.mnemonic) {
                        Some(opcode) => {
                            self.mnemonic.clear();
                            self.frame.put_u8(opcode);
                            self.state = State::Capture;
                        }
                        None => {
                            self.abandon_mnemonic();
                            self.put_frame_byte(byte);
                        }
                    }
                    return None;
                }

                if byte == END_BYTE {
                    self.abandon_mnemonic();
                    return Some(self.finish());
                }

                if byte.is_ascii_alphabetic() && self.mnemonic.len() < MAX_MNEMONIC_LEN {
                    self.mnemonic.put_u8(byte);
                    return None;
                }

                self.abandon_mnemonic();
                self.put_frame_byte(byte);
                None
            }
        }
    }

    /// Drains the bytes seen outside of any frame.
    pub fn take_passthrough(&mut self) -> Option<Bytes> {
        if self.passthrough.is_empty() {
            return None;
        }
        Some(self.passthrough.split().freeze())
    }

    /// True while a frame is being captured.
    pub fn in_frame(&self) -> bool {
        self.state != State::Passthrough
    }

    fn abandon_mnemonic(&mut self) {
        tracing::debug!(
            name = %String::from_utf8_lossy(&self.mnemonic),
            "Unresolved mnemonic kept as frame text"
        );
        let text = self.mnemonic.split();
        self.state = State::Capture;
        for byte in text {
            self.put_frame_byte(byte);
        }
    }

    fn put_frame_byte(&mut self, byte: u8) {
        if self.state == State::Discard {
            return;
        }

        if self.frame.len() >= self.max_frame_len {
            tracing::warn!(limit = self.max_frame_len, "Command frame overflow, discarded");
            self.reset();
            self.state = State::Discard;
            return;
        }

        self.frame.put_u8(byte);
    }

    fn finish(&mut self) -> CommandFrame {
        let frame = CommandFrame::from_bytes(&self.frame);
        self.reset();
        frame
    }

    fn reset(&mut self) {
        self.frame.clear();
        self.mnemonic.clear();
        self.state = State::Passthrough;
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
