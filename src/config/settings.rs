use std::time::Duration;

use serde::Deserialize;

use crate::codec::ProtocolLevel;

/// Top-level configuration settings for the application.
///
/// Includes settings for the listeners, the broker core and logging.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub logging: LoggingSettings,
}

/// Where the listeners bind.
///
/// The WebSocket listener only runs when `websocket_port` is set.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub websocket_port: Option<u16>,
}

/// Limits and timeouts consumed by the broker core.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Seconds a new connection has to send CONNECT.
    pub connect_timeout_secs: u64,
    /// Outbound QoS 1/2 messages awaiting acknowledgement per session.
    pub max_in_flight: u16,
    /// Inbound QoS 2 messages awaiting PUBREL per session.
    pub max_receive: u16,
    /// Buffered outbound bytes that force a flush.
    pub max_unflushed_bytes: usize,
    pub max_packet_size: usize,
    pub outgoing_queue_capacity: usize,
    pub protocols: ProtocolSettings,
}

impl BrokerSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Per protocol level enable switches.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolSettings {
    pub v3_1: bool,
    pub v3_1_1: bool,
    pub v5: bool,
}

impl ProtocolSettings {
    pub fn is_enabled(&self, level: ProtocolLevel) -> bool {
        match level {
            ProtocolLevel::V3_1 => self.v3_1,
            ProtocolLevel::V3_1_1 => self.v3_1_1,
            ProtocolLevel::V5 => self.v5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub websocket_port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub connect_timeout_secs: Option<u64>,
    pub max_in_flight: Option<u16>,
    pub max_receive: Option<u16>,
    pub max_unflushed_bytes: Option<usize>,
    pub max_packet_size: Option<usize>,
    pub outgoing_queue_capacity: Option<usize>,
    pub protocols: Option<PartialProtocolSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialProtocolSettings {
    pub v3_1: Option<bool>,
    pub v3_1_1: Option<bool>,
    pub v5: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let protocols = broker.protocols.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                websocket_port: server.websocket_port.or(default.server.websocket_port),
            },
            broker: BrokerSettings {
                connect_timeout_secs: broker
                    .connect_timeout_secs
                    .unwrap_or(default.broker.connect_timeout_secs),
                max_in_flight: broker.max_in_flight.unwrap_or(default.broker.max_in_flight),
                max_receive: broker.max_receive.unwrap_or(default.broker.max_receive),
                max_unflushed_bytes: broker
                    .max_unflushed_bytes
                    .unwrap_or(default.broker.max_unflushed_bytes),
                max_packet_size: broker
                    .max_packet_size
                    .unwrap_or(default.broker.max_packet_size),
                outgoing_queue_capacity: broker
                    .outgoing_queue_capacity
                    .unwrap_or(default.broker.outgoing_queue_capacity),
                protocols: ProtocolSettings {
                    v3_1: protocols.v3_1.unwrap_or(default.broker.protocols.v3_1),
                    v3_1_1: protocols.v3_1_1.unwrap_or(default.broker.protocols.v3_1_1),
                    v5: protocols.v5.unwrap_or(default.broker.protocols.v5),
                },
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 1883,
                websocket_port: None,
            },
            broker: BrokerSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            max_in_flight: 32,
            max_receive: 64,
            max_unflushed_bytes: 16 * 1024,
            max_packet_size: 1024 * 1024,
            outgoing_queue_capacity: 1024,
            protocols: ProtocolSettings {
                v3_1: true,
                v3_1_1: true,
                v5: true,
            },
        }
    }
}
