//! MQTT over WebSocket.
//!
//! Each connection is bridged into an in-memory duplex stream so the session
//! driver sees the same byte stream it gets from TCP. Only binary frames
//! carry MQTT data; the `mqtt` sub-protocol is echoed when offered.

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tracing::{debug, info};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;

const MQTT_SUBPROTOCOL: &str = "mqtt";
const BRIDGE_BUFFER: usize = 64 * 1024;

/// Binds `addr` and serves MQTT over WebSocket until accepting fails.
pub async fn start_websocket_server(addr: &str, broker: Broker) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("MQTT listening on ws://{}", listener.local_addr()?);
    serve_websocket(listener, broker).await
}

/// Accept loop over an already bound listener.
pub async fn serve_websocket(listener: TcpListener, broker: Broker) -> std::io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(error) = bridge(stream, broker).await {
                debug!(%peer, %error, "websocket handshake failed");
            }
        });
    }
}

fn negotiate_subprotocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    let offered = request
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if offered
        .split(',')
        .any(|protocol| protocol.trim().eq_ignore_ascii_case(MQTT_SUBPROTOCOL))
    {
        response.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(MQTT_SUBPROTOCOL),
        );
    }
    Ok(response)
}

async fn bridge(stream: TcpStream, broker: Broker) -> Result<(), tungstenite::Error> {
    let ws_stream = accept_hdr_async(stream, negotiate_subprotocol).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (local, remote) = duplex(BRIDGE_BUFFER);
    broker.accept(remote);
    let (mut from_session, mut to_session) = tokio::io::split(local);

    // session -> client
    let outbound = async {
        let mut buf = BytesMut::with_capacity(BRIDGE_BUFFER);
        loop {
            buf.reserve(BRIDGE_BUFFER);
            match from_session.read_buf(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let frame = WsMessage::Binary(buf.split().freeze());
                    if ws_sender.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_sender.close().await;
    };

    // client -> session
    let inbound = async {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(WsMessage::Binary(data)) => {
                    if to_session.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Text(_)) => {
                    debug!("text frame on an MQTT connection, closing");
                    break;
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        let _ = to_session.shutdown().await;
    };

    tokio::join!(outbound, inbound);
    Ok(())
}
