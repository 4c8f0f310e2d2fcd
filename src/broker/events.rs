use bytes::Bytes;
use tracing::{debug, info};

use crate::broker::message::Message;
use crate::codec::QoS;

/// Session events, injected when the broker is built.
///
/// Called synchronously from the session's reader task, so implementations
/// must not block.
pub trait SessionObserver: Send + Sync {
    fn on_publish(&self, _client_id: &str, _message: &Message) {}

    /// `granted` holds one entry per filter, `None` for a refused filter.
    fn on_subscribe(&self, _client_id: &str, _filters: &[(Bytes, QoS)], _granted: &[Option<QoS>]) {}

    fn on_unsubscribe(&self, _client_id: &str, _filters: &[Bytes]) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_publish(&self, client_id: &str, message: &Message) {
        debug!(
            client_id,
            topic = %String::from_utf8_lossy(&message.topic),
            qos = message.qos as u8,
            bytes = message.payload.len(),
            "publish received"
        );
    }

    fn on_subscribe(&self, client_id: &str, filters: &[(Bytes, QoS)], granted: &[Option<QoS>]) {
        for ((filter, _), qos) in filters.iter().zip(granted) {
            info!(
                client_id,
                filter = %String::from_utf8_lossy(filter),
                granted = ?qos,
                "subscribe"
            );
        }
    }

    fn on_unsubscribe(&self, client_id: &str, filters: &[Bytes]) {
        for filter in filters {
            info!(client_id, filter = %String::from_utf8_lossy(filter), "unsubscribe");
        }
    }
}
