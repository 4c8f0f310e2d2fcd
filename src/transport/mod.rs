//! The `transport` module accepts network connections and hands each one
//! to the broker as a byte stream.
//!
//! - `tcp`: plain MQTT over TCP
//! - `websocket`: MQTT over WebSocket binary frames

pub mod tcp;
pub mod websocket;

pub use tcp::{serve_tcp, start_tcp_server};
pub use websocket::{serve_websocket, start_websocket_server};

#[cfg(test)]
mod tests;
