//! Opcode bytes and the mnemonic table.
//!
//! The controller may select an operation either with a raw byte in the
//! reserved high range or with a short ASCII name followed by `:`. Names are
//! resolved through [`MNEMONICS`], where the entry at index `i` stands for the
//! raw byte `0xF0 - i`.

/// Marks the start of every command and response frame.
pub const START_BYTE: u8 = 0xFE;

/// Terminates every frame.
pub const END_BYTE: u8 = b'\r';

/// Lowest byte value that is treated as a raw opcode.
pub const MIN_OPCODE: u8 = 0x80;

/// Raw opcode of the mnemonic table entry at index 0.
pub const MNEMONIC_BASE: u8 = 0xF0;

/// Longest mnemonic accepted before `:`.
pub const MAX_MNEMONIC_LEN: usize = 8;

/// Ordered mnemonic table. Index 0 is the unused `0xF0` gap and never matches.
pub const MNEMONICS: [&str; 19] = [
    "", "JOIN", "CHECK", "SET", "POLL", "PATH", "SEND", "RECV", "CLOSE", "LISTEN", "ARG",
    "REPLY", "CONNECT", "APSCAN", "APGET", "FINFO", "FCOUNT", "FRUN", "UDP",
];

/// Operations understood by the command dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Join = 0xEF,
    /// Property get, named `CHECK` on the wire.
    Check = 0xEE,
    Set = 0xED,
    Poll = 0xEC,
    Path = 0xEB,
    Send = 0xEA,
    Recv = 0xE9,
    Close = 0xE8,
    Listen = 0xE7,
    Arg = 0xE6,
    Reply = 0xE5,
    Connect = 0xE4,
    ApScan = 0xE3,
    ApGet = 0xE2,
    FileInfo = 0xE1,
    FileCount = 0xE0,
    FileRun = 0xDF,
    Udp = 0xDE,
}

impl Opcode {
    /// Maps a raw opcode byte to a known operation.
    pub fn from_byte(byte: u8) -> Option<Self> {
        let op = match byte {
            0xEF => Opcode::Join,
            0xEE => Opcode::Check,
            0xED => Opcode::Set,
            0xEC => Opcode::Poll,
            0xEB => Opcode::Path,
            0xEA => Opcode::Send,
            0xE9 => Opcode::Recv,
            0xE8 => Opcode::Close,
            0xE7 => Opcode::Listen,
            0xE6 => Opcode::Arg,
            0xE5 => Opcode::Reply,
            0xE4 => Opcode::Connect,
            0xE3 => Opcode::ApScan,
            0xE2 => Opcode::ApGet,
            0xE1 => Opcode::FileInfo,
            0xE0 => Opcode::FileCount,
            0xDF => Opcode::FileRun,
            0xDE => Opcode::Udp,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// The mnemonic that resolves to this opcode.
    pub fn mnemonic(self) -> &'static str {
        MNEMONICS[(MNEMONIC_BASE - self.as_byte()) as usize]
    }
}

/// Resolves a mnemonic to its raw opcode byte.
///
/// Matching is exact and case-sensitive; the first table entry wins.
///
/// ```
/// # use wxbridge::protocol::opcode::resolve_mnemonic;
/// assert_eq!(resolve_mnemonic(b"JOIN"), Some(0xEF));
/// assert_eq!(resolve_mnemonic(b"join"), None);
/// ```
pub fn resolve_mnemonic(name: &[u8]) -> Option<u8> {
    if name.is_empty() || name.len() > MAX_MNEMONIC_LEN {
        return None;
    }

    MNEMONICS
        .iter()
        .position(|entry| entry.as_bytes() == name)
        .map(|index| MNEMONIC_BASE - index as u8)
}
