use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::broker::Broker;

/// Binds `addr` and serves MQTT over plain TCP until accepting fails.
pub async fn start_tcp_server(addr: &str, broker: Broker) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("MQTT listening on tcp://{}", listener.local_addr()?);
    serve_tcp(listener, broker).await
}

/// Accept loop over an already bound listener.
pub async fn serve_tcp(listener: TcpListener, broker: Broker) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        if let Err(error) = stream.set_nodelay(true) {
            warn!(%peer, %error, "could not disable Nagle");
        }
        debug!(%peer, "tcp connection accepted");
        broker.accept(stream);
    }
}
