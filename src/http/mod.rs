//! HTTP/1.1 side of the bridge.
//!
//! - **`connection`**: per-client state machine that hands requests to the registry
//! - **`parser`**: request parsing from the connection buffer
//! - **`request`**: parsed request and its builder
//! - **`response`**: status codes and built-in responses
//! - **`writer`**: response serialization
//!
//! # Connection lifecycle
//!
//! ```text
//!   Reading ──request──► Processing ──pattern matched──► Parked
//!      ▲                     │                     (controller sends REPLY,
//!      │                     │ busy / no match      then the socket closes)
//!      │                     ▼
//!      └──keep-alive──── Writing ──close──► Closed
//! ```
//!
//! A parked connection leaves the worker entirely: its stream lives in a
//! registry slot until the serial task streams the reply and shuts it down.

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
