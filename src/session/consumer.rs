use std::ops::ControlFlow;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;

use crate::broker::Hub;
use crate::broker::message::Message;
use crate::broker::queue::Outgoing;
use crate::broker::session_state::{CloseReason, SessionLease, SessionState};
use crate::codec::{
    Ack, Disconnect, Packet, Properties, Publish, QoS, SUBACK_FAILURE, SubAck, Subscribe, UnsubAck,
    Unsubscribe, encode_to_bytes, reason_code,
};
use crate::session::Link;
use crate::session::inbound::PacketReader;
use crate::topic::is_valid_topic_name;
use crate::utils::error::SessionError;

/// Inbound half of an Active session: reads packets in arrival order and
/// handles each one before reading the next.
pub(crate) struct Consumer<'a> {
    hub: &'a Hub,
    state: &'a SessionState,
    link: &'a mut Link,
    lease: &'a SessionLease,
}

impl<'a> Consumer<'a> {
    pub(crate) fn new(
        hub: &'a Hub,
        state: &'a SessionState,
        link: &'a mut Link,
        lease: &'a SessionLease,
    ) -> Self {
        Self {
            hub,
            state,
            link,
            lease,
        }
    }

    /// Returns `Ok` once a close reason has been recorded, by this loop or
    /// by anyone else.
    pub(crate) async fn run<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut PacketReader<R>,
        mut shutdown: watch::Receiver<Option<CloseReason>>,
    ) -> Result<(), SessionError> {
        loop {
            let packet = tokio::select! {
                _ = shutdown.wait_for(Option::is_some) => return Ok(()),
                packet = Self::read(reader, self.link.keep_alive) => packet?,
            };
            let Some(packet) = packet else {
                debug!(client_id = %self.link.client_id, "end of stream");
                self.lease.close(CloseReason::ConnectionLost);
                return Ok(());
            };
            if self.handle(packet)?.is_break() {
                return Ok(());
            }
        }
    }

    async fn read<R: AsyncRead + Unpin>(
        reader: &mut PacketReader<R>,
        keep_alive: Option<std::time::Duration>,
    ) -> Result<Option<Packet>, SessionError> {
        match keep_alive {
            Some(limit) => timeout(limit, reader.next_packet())
                .await
                .map_err(|_| SessionError::KeepAliveTimeout)?,
            None => reader.next_packet().await,
        }
    }

    fn handle(&mut self, packet: Packet) -> Result<ControlFlow<()>, SessionError> {
        match packet {
            Packet::Publish(publish) => self.on_publish(publish)?,
            Packet::PubAck(ack) => {
                if !self.state.ack(ack.packet_id) {
                    debug!(client_id = %self.link.client_id, packet_id = ack.packet_id, "PUBACK for unknown packet id");
                }
            }
            Packet::PubRec(ack) => self.on_pubrec(ack)?,
            Packet::PubRel(ack) => self.on_pubrel(ack.packet_id)?,
            Packet::PubComp(ack) => {
                if !self.state.complete(ack.packet_id) {
                    debug!(client_id = %self.link.client_id, packet_id = ack.packet_id, "PUBCOMP for unknown packet id");
                }
            }
            Packet::Subscribe(subscribe) => self.on_subscribe(subscribe)?,
            Packet::Unsubscribe(unsubscribe) => self.on_unsubscribe(unsubscribe)?,
            Packet::PingReq => self.send(Packet::PingResp)?,
            Packet::Disconnect(disconnect) => {
                self.on_disconnect(disconnect)?;
                return Ok(ControlFlow::Break(()));
            }
            Packet::Connect(_) => return Err(SessionError::ProtocolViolation("second CONNECT")),
            Packet::Auth(_) => {
                return Err(SessionError::ProtocolViolation(
                    "enhanced authentication is not supported",
                ));
            }
            Packet::ConnAck(_) | Packet::SubAck(_) | Packet::UnsubAck(_) | Packet::PingResp => {
                return Err(SessionError::ProtocolViolation(
                    "server-to-client packet sent by client",
                ));
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn send(&self, packet: Packet) -> Result<(), SessionError> {
        let encoded = encode_to_bytes(&packet, self.link.level)?;
        self.state.enqueue(Outgoing::Control(encoded))
    }

    fn publish(&self, message: &Message) -> usize {
        self.hub.observer().on_publish(&self.link.client_id, message);
        self.hub.dispatch(message)
    }

    /// Reason code for an accepted PUBLISH. Left off the wire below 5.0.
    fn delivery_reason(delivered: usize) -> u8 {
        if delivered == 0 {
            reason_code::NO_MATCHING_SUBSCRIBERS
        } else {
            reason_code::SUCCESS
        }
    }

    fn on_publish(&mut self, publish: Publish) -> Result<(), SessionError> {
        if !is_valid_topic_name(&publish.topic) {
            return Err(SessionError::TopicNameInvalid);
        }
        let message = Message::from(&publish);

        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => {
                self.publish(&message);
            }
            (QoS::AtLeastOnce, Some(packet_id)) => {
                let delivered = self.publish(&message);
                self.send(Packet::PubAck(Ack::with_reason(
                    packet_id,
                    Self::delivery_reason(delivered),
                )))?;
            }
            (QoS::ExactlyOnce, Some(packet_id)) => {
                let reason = if self.state.is_incoming_pending(packet_id) {
                    // retransmission, already dispatched
                    reason_code::SUCCESS
                } else {
                    if self.state.incoming_len() >= self.link.max_receive {
                        return Err(SessionError::ReceiveMaximumExceeded);
                    }
                    self.state.begin_incoming(packet_id);
                    Self::delivery_reason(self.publish(&message))
                };
                self.send(Packet::PubRec(Ack::with_reason(packet_id, reason)))?;
            }
            (_, None) => {
                return Err(SessionError::ProtocolViolation(
                    "PUBLISH above QoS 0 without packet id",
                ));
            }
        }
        Ok(())
    }

    fn on_pubrec(&mut self, ack: Ack) -> Result<(), SessionError> {
        let packet_id = ack.packet_id;
        if self.link.level.is_v5() && ack.reason_code >= 0x80 {
            // the client refused the message; the flow ends here
            self.state.abandon(packet_id);
            return Ok(());
        }
        if self.state.received(packet_id) {
            self.send(Packet::PubRel(Ack::new(packet_id)))
        } else if self.link.level.is_v5() {
            self.send(Packet::PubRel(Ack::with_reason(
                packet_id,
                reason_code::PACKET_IDENTIFIER_NOT_FOUND,
            )))
        } else {
            debug!(client_id = %self.link.client_id, packet_id, "PUBREC for unknown packet id");
            Ok(())
        }
    }

    fn on_pubrel(&mut self, packet_id: u16) -> Result<(), SessionError> {
        if self.state.release_incoming(packet_id) {
            self.send(Packet::PubComp(Ack::new(packet_id)))
        } else if self.link.level.is_v5() {
            self.send(Packet::PubComp(Ack::with_reason(
                packet_id,
                reason_code::PACKET_IDENTIFIER_NOT_FOUND,
            )))
        } else {
            debug!(client_id = %self.link.client_id, packet_id, "PUBREL without PUBREC ignored");
            Ok(())
        }
    }

    fn on_subscribe(&mut self, subscribe: Subscribe) -> Result<(), SessionError> {
        let filters: Vec<(Bytes, QoS)> = subscribe
            .filters
            .into_iter()
            .map(|(filter, options)| (filter, options.qos))
            .collect();
        let granted = self.state.subscriptions().subscribe(&filters);
        self.hub
            .observer()
            .on_subscribe(&self.link.client_id, &filters, &granted);

        let v5 = self.link.level.is_v5();
        let return_codes = granted
            .iter()
            .map(|qos| match qos {
                Some(qos) => *qos as u8,
                None if v5 => reason_code::TOPIC_FILTER_INVALID,
                None => SUBACK_FAILURE,
            })
            .collect();
        self.send(Packet::SubAck(SubAck {
            packet_id: subscribe.packet_id,
            properties: Properties::default(),
            return_codes,
        }))
    }

    fn on_unsubscribe(&mut self, unsubscribe: Unsubscribe) -> Result<(), SessionError> {
        let removed = self.state.subscriptions().unsubscribe(&unsubscribe.filters);
        self.hub
            .observer()
            .on_unsubscribe(&self.link.client_id, &unsubscribe.filters);

        let reason_codes = if self.link.level.is_v5() {
            removed
                .iter()
                .map(|found| {
                    if *found {
                        reason_code::SUCCESS
                    } else {
                        reason_code::NO_SUBSCRIPTION_EXISTED
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        self.send(Packet::UnsubAck(UnsubAck {
            packet_id: unsubscribe.packet_id,
            properties: Properties::default(),
            reason_codes,
        }))
    }

    fn on_disconnect(&mut self, disconnect: Disconnect) -> Result<(), SessionError> {
        let v5 = self.link.level.is_v5();
        // MQTT 5.0 keeps the will for every reason other than a normal
        // disconnection.
        if !v5 || disconnect.reason_code == reason_code::NORMAL_DISCONNECTION {
            self.state.take_will();
        }
        if v5 {
            if let Some(expiry) = disconnect.properties.session_expiry_interval() {
                if self.link.session_expiry == 0 && expiry > 0 {
                    return Err(SessionError::ProtocolViolation(
                        "session expiry raised from zero on DISCONNECT",
                    ));
                }
                self.link.persistent = expiry > 0;
            }
        }
        debug!(client_id = %self.link.client_id, reason = disconnect.reason_code, "client disconnect");
        self.lease.close(CloseReason::ClientDisconnect);
        Ok(())
    }
}
