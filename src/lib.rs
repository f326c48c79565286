//! wxbridge - serial command bridge to TCP and HTTP
//!
//! A controller on a serial line drives outbound TCP connections and answers
//! inbound HTTP requests through a small framed command protocol.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod http;
pub mod net;
pub mod protocol;
pub mod registry;
pub mod serial;
pub mod server;
pub mod settings;
