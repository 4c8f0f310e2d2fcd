use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tungstenite::client::IntoClientRequest;
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::codec::{Connect, Packet, ProtocolLevel, encode_to_bytes};
use crate::transport::{serve_tcp, serve_websocket};

const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

fn connect_bytes(client_id: &'static str) -> Bytes {
    let connect = Connect::new(ProtocolLevel::V3_1_1, client_id);
    encode_to_bytes(&Packet::Connect(Box::new(connect)), ProtocolLevel::V3_1_1)
        .expect("connect encodes")
}

#[tokio::test]
async fn test_tcp_connect_gets_connack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_tcp(listener, Broker::default()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&connect_bytes("tcp-client")).await.unwrap();

    let mut reply = [0u8; 4];
    timeout(Duration::from_secs(5), stream.read_exact(&mut reply))
        .await
        .expect("connack in time")
        .unwrap();
    assert_eq!(reply, CONNACK_ACCEPTED);
}

#[tokio::test]
async fn test_tcp_garbage_closes_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_tcp(listener, Broker::default()));

    let mut stream = TcpStream::connect(addr).await.unwrap();
    // Reserved packet type 0.
    stream.write_all(&[0x00, 0x00]).await.unwrap();

    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
        .await
        .expect("closed in time");
    assert!(read.is_err() || buf.is_empty());
}

#[tokio::test]
async fn test_websocket_connect_gets_connack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_websocket(listener, Broker::default()));

    let mut request = format!("ws://{addr}/mqtt").into_client_request().unwrap();
    request
        .headers_mut()
        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));
    let (mut ws, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response.headers().get(SEC_WEBSOCKET_PROTOCOL).unwrap(),
        "mqtt"
    );

    ws.send(WsMessage::Binary(connect_bytes("ws-client")))
        .await
        .unwrap();

    // The CONNACK may arrive split across frames.
    let mut received = Vec::new();
    while received.len() < CONNACK_ACCEPTED.len() {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .unwrap();
        if let WsMessage::Binary(data) = frame {
            received.extend_from_slice(&data);
        }
    }
    assert_eq!(received, CONNACK_ACCEPTED);
}
