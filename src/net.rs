//! Network collaborator used by the dispatcher.
//!
//! The dispatcher asks the network side to join a WiFi network, to resolve
//! host names and for the station address. It never drives the WiFi state
//! machine itself.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;

use tokio::sync::Mutex;

/// WiFi and resolver operations the bridge depends on.
pub trait Network: Send + Sync {
    /// Stores station credentials and starts a reconnect.
    fn join(&self, ssid: &str, password: &str) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Resolves `host` to an address with `port` applied.
    fn resolve(&self, host: &str, port: u16) -> impl Future<Output = io::Result<SocketAddr>> + Send;

    /// IPv4 address of the station interface, if it has one.
    fn local_ipv4(&self) -> Option<Ipv4Addr>;
}

/// Station credentials handed to [`Network::join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

/// Network backed by the host's own stack.
///
/// The host is assumed to be connected already, so a join only records the
/// pending credentials for whoever manages the interface.
#[derive(Debug, Clone, Default)]
pub struct HostNetwork {
    pending: Arc<Mutex<Option<Credentials>>>,
}

impl HostNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credentials from the most recent join, if any.
    pub async fn pending_credentials(&self) -> Option<Credentials> {
        self.pending.lock().await.clone()
    }
}

impl Network for HostNetwork {
    async fn join(&self, ssid: &str, password: &str) -> anyhow::Result<()> {
        tracing::info!(ssid, "Station credentials updated, reconnecting");
        *self.pending.lock().await = Some(Credentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    async fn resolve(&self, host: &str, port: u16) -> io::Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((host, port)).await?;
        addrs
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no IPv4 address for host"))
    }

    /// Source address the host would route outbound traffic from.
    ///
    /// Connecting a UDP socket only selects a route; nothing is sent.
    fn local_ipv4(&self) -> Option<Ipv4Addr> {
        let routed = (|| {
            let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
            socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
            socket.local_addr()
        })();

        match routed {
            Ok(SocketAddr::V4(addr)) if !addr.ip().is_unspecified() => Some(*addr.ip()),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "No route for station address");
                None
            }
        }
    }
}
