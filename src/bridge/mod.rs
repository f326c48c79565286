//! Command handlers and the outbound TCP socket they drive.

pub mod dispatcher;
pub mod params;
pub mod socket;

pub use dispatcher::Dispatcher;
pub use socket::{BridgeSocket, SocketState};
