use bytes::{BufMut, Bytes, BytesMut};

use crate::protocol::opcode::{END_BYTE, START_BYTE};

/// Error codes carried by `E` status frames.
///
/// The numeric values are part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    InvalidRequest = 1,
    InvalidArgument = 2,
    WrongArgumentCount = 3,
    NoFreeListener = 4,
    NoFreeConnection = 5,
    LookupFailed = 6,
    ConnectFailed = 7,
    SendFailed = 8,
    InvalidState = 9,
    InvalidSize = 10,
    Disconnected = 11,
    Unimplemented = 12,
    Busy = 13,
    InternalError = 14,
    InvalidMethod = 15,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Leading character of a poll-notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A GET request is waiting.
    Get,
    /// A POST request is waiting.
    Post,
    /// Nothing is waiting.
    Nothing,
}

impl NoticeKind {
    pub fn as_char(self) -> char {
        match self {
            NoticeKind::Get => 'G',
            NoticeKind::Post => 'P',
            NoticeKind::Nothing => 'N',
        }
    }
}

/// A frame sent from the host to the controller.
///
/// Every frame starts with `START_BYTE '='` and ends with CR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// `S,<value>`
    Success(i32),
    /// `E,<code>`
    Error(ErrorCode),
    /// `S,<text>`
    Text(String),
    /// `<kind>:<handle>,<id>`
    Notice {
        kind: NoticeKind,
        handle: i32,
        id: i32,
    },
}

impl ResponseFrame {
    pub fn ok() -> Self {
        ResponseFrame::Success(ErrorCode::None.as_i32())
    }

    pub fn notice(kind: NoticeKind, handle: usize, id: i32) -> Self {
        ResponseFrame::Notice {
            kind,
            handle: handle as i32,
            id,
        }
    }

    /// Serializes the frame into its wire form.
    ///
    /// # Example
    ///
    /// ```
    /// # use wxbridge::protocol::response::{ErrorCode, ResponseFrame};
    /// assert_eq!(&ResponseFrame::Error(ErrorCode::InvalidState).encode()[..], b"\xFE=E,9\r");
    /// ```
    pub fn encode(&self) -> Bytes {
        let body = match self {
            ResponseFrame::Success(value) => format!("S,{}", value),
            ResponseFrame::Error(code) => format!("E,{}", code.as_i32()),
            ResponseFrame::Text(text) => format!("S,{}", text),
            ResponseFrame::Notice { kind, handle, id } => {
                format!("{}:{},{}", kind.as_char(), handle, id)
            }
        };

        let mut buf = BytesMut::with_capacity(body.len() + 3);
        buf.put_u8(START_BYTE);
        buf.put_u8(b'=');
        buf.put_slice(body.as_bytes());
        buf.put_u8(END_BYTE);
        buf.freeze()
    }
}

impl From<ErrorCode> for ResponseFrame {
    fn from(code: ErrorCode) -> Self {
        ResponseFrame::Error(code)
    }
}
