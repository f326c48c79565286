use tokio::net::TcpListener;
use tracing::info;

use crate::http::connection::Connection;
use crate::registry::Registry;

/// Accepts HTTP clients forever, one task per connection.
pub async fn run(listener: TcpListener, registry: Registry) -> anyhow::Result<()> {
    info!("Listening on {}", listener.local_addr()?);

    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let registry = registry.clone();
        tokio::spawn(async move {
            let mut conn = Connection::new(socket, registry);
            if let Err(e) = conn.run().await {
                tracing::error!("Connection error from {}: {}", peer, e);
            }
        });
    }
}

/// Binds `addr` and serves it.
pub async fn bind_and_run(addr: &str, registry: Registry) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    run(listener, registry).await
}
