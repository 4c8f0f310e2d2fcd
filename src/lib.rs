//! # PopMQTT
//!
//! `popmqtt` is an in-memory MQTT broker built with Rust and tokio. It speaks
//! MQTT 3.1, 3.1.1 and 5.0 over TCP or WebSocket and delivers QoS 0, 1 and 2
//! messages to wildcard subscribers.
//!
//! ## Core Modules
//!
//! - `codec`: The MQTT wire format. Fragmentation-tolerant decoding and exact-size encoding.
//! - `topic`: Topic filter validation and wildcard matching.
//! - `broker`: Session state, subscriptions, outgoing queues and the hub that dispatches messages.
//! - `session`: Drives one client connection from CONNECT to close.
//! - `transport`: TCP and WebSocket listeners.
//! - `config`: Handles loading and managing server configuration.
//! - `utils`: Error types and logging setup.

pub mod broker;
pub mod codec;
pub mod config;
pub mod session;
pub mod topic;
pub mod transport;
pub mod utils;
