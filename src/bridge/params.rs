//! Field parsing for command params.
//!
//! Params are ASCII and comma separated. Numbers are parsed strictly; a
//! field that is not a number is reported with the caller's error code.

use crate::protocol::ErrorCode;
use crate::registry::MAX_LISTENERS;

/// Largest payload moved by a single `SEND`, `RECV` or `REPLY`.
pub const MAX_TRANSFER: usize = 1024;

/// Splits at the first comma, failing with `missing` when there is none.
pub fn split_pair(params: &str, missing: ErrorCode) -> Result<(&str, &str), ErrorCode> {
    params.split_once(',').ok_or(missing)
}

/// Parses a transfer length in `1..=MAX_TRANSFER`.
pub fn transfer_len(field: &str) -> Result<usize, ErrorCode> {
    match field.trim().parse::<i64>() {
        Ok(len) if len > 0 && len as usize <= MAX_TRANSFER => Ok(len as usize),
        _ => Err(ErrorCode::InvalidSize),
    }
}

/// Parses a TCP port; 0 and non-numbers are invalid.
pub fn port(field: &str) -> Result<u16, ErrorCode> {
    match field.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(ErrorCode::InvalidArgument),
    }
}

/// Parses a registry handle.
pub fn handle(field: &str) -> Result<usize, ErrorCode> {
    match field.trim().parse::<usize>() {
        Ok(handle) if handle < MAX_LISTENERS => Ok(handle),
        _ => Err(ErrorCode::InvalidArgument),
    }
}
