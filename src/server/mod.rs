//! Network listeners.

pub mod listener;
