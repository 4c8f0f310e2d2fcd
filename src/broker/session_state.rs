use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use crate::broker::message::Message;
use crate::broker::queue::{Outgoing, OutgoingQueue, PublishDescriptor};
use crate::broker::subscription::SubscriptionTable;
use crate::codec::{QoS, reason_code};
use crate::utils::error::SessionError;

/// Why a live session ended. The first reason recorded wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent DISCONNECT.
    ClientDisconnect,
    /// The transport failed or reached end of stream.
    ConnectionLost,
    /// A new CONNECT with the same client id arrived.
    TakenOver,
    /// The broker is stopping.
    ServerShutdown,
    /// The outgoing queue overflowed.
    QueueOverflow,
    KeepAliveTimeout,
    MalformedPacket,
    ProtocolError,
    TopicNameInvalid,
    ReceiveMaximumExceeded,
}

impl CloseReason {
    /// Reason code of the DISCONNECT an MQTT 5.0 client is sent, if any.
    pub fn disconnect_code(self) -> Option<u8> {
        match self {
            CloseReason::ClientDisconnect
            | CloseReason::ConnectionLost
            | CloseReason::MalformedPacket => None,
            CloseReason::TakenOver => Some(reason_code::SESSION_TAKEN_OVER),
            CloseReason::ServerShutdown => Some(reason_code::SERVER_SHUTTING_DOWN),
            CloseReason::QueueOverflow => Some(reason_code::QUOTA_EXCEEDED),
            CloseReason::KeepAliveTimeout => Some(reason_code::KEEP_ALIVE_TIMEOUT),
            CloseReason::ProtocolError => Some(reason_code::PROTOCOL_ERROR),
            CloseReason::TopicNameInvalid => Some(reason_code::TOPIC_NAME_INVALID),
            CloseReason::ReceiveMaximumExceeded => Some(reason_code::RECEIVE_MAXIMUM_EXCEEDED),
        }
    }
}

impl From<&SessionError> for CloseReason {
    fn from(error: &SessionError) -> Self {
        match error {
            SessionError::MalformedPacket(_) => CloseReason::MalformedPacket,
            SessionError::KeepAliveTimeout => CloseReason::KeepAliveTimeout,
            SessionError::QueueOverflow => CloseReason::QueueOverflow,
            SessionError::TopicNameInvalid => CloseReason::TopicNameInvalid,
            SessionError::ReceiveMaximumExceeded => CloseReason::ReceiveMaximumExceeded,
            SessionError::Io(_) => CloseReason::ConnectionLost,
            _ => CloseReason::ProtocolError,
        }
    }
}

/// Acknowledgement stage of an outbound QoS 1/2 message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// PUBLISH written, waiting for PUBACK (QoS 1) or PUBREC (QoS 2).
    Sent,
    /// PUBREC received and PUBREL written, waiting for PUBCOMP.
    Released,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlightEntry {
    pub packet_id: u16,
    pub stage: Stage,
    pub publish: PublishDescriptor,
}

/// What to resend when a session resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redelivery {
    /// PUBLISH with DUP set.
    Publish(u16, PublishDescriptor),
    /// PUBREL for a message the client already received.
    Release(u16),
}

/// Outbound messages awaiting acknowledgement, in send order.
#[derive(Debug)]
pub struct InFlightWindow {
    entries: Vec<InFlightEntry>,
    next_id: u16,
}

impl Default for InFlightWindow {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
        }
    }
}

impl InFlightWindow {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records `publish` as sent under a fresh non-zero packet id.
    pub fn insert(&mut self, publish: PublishDescriptor) -> u16 {
        let packet_id = self.allocate_id();
        self.entries.push(InFlightEntry {
            packet_id,
            stage: Stage::Sent,
            publish,
        });
        packet_id
    }

    fn allocate_id(&mut self) -> u16 {
        loop {
            let candidate = self.next_id;
            self.next_id = self.next_id.checked_add(1).unwrap_or(1);
            if !self.entries.iter().any(|e| e.packet_id == candidate) {
                return candidate;
            }
        }
    }

    fn position(&self, packet_id: u16, qos: QoS, stage: Stage) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.packet_id == packet_id && e.publish.qos == qos && e.stage == stage)
    }

    /// PUBACK: completes a QoS 1 message.
    pub fn ack(&mut self, packet_id: u16) -> bool {
        match self.position(packet_id, QoS::AtLeastOnce, Stage::Sent) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// PUBREC: moves a QoS 2 message to the released stage. A repeated
    /// PUBREC for an already released id is accepted again.
    pub fn received(&mut self, packet_id: u16) -> bool {
        if self
            .position(packet_id, QoS::ExactlyOnce, Stage::Released)
            .is_some()
        {
            return true;
        }
        match self.position(packet_id, QoS::ExactlyOnce, Stage::Sent) {
            Some(index) => {
                self.entries[index].stage = Stage::Released;
                true
            }
            None => false,
        }
    }

    /// PUBCOMP: completes a QoS 2 message.
    pub fn complete(&mut self, packet_id: u16) -> bool {
        match self.position(packet_id, QoS::ExactlyOnce, Stage::Released) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Drops a message the client refused, whatever its stage.
    pub fn abandon(&mut self, packet_id: u16) -> bool {
        match self.entries.iter().position(|e| e.packet_id == packet_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Everything unacknowledged, oldest first, marked for retransmission.
    pub fn redelivery(&self) -> Vec<Redelivery> {
        self.entries
            .iter()
            .map(|entry| match entry.stage {
                Stage::Sent => {
                    let mut publish = entry.publish.clone();
                    publish.dup = true;
                    Redelivery::Publish(entry.packet_id, publish)
                }
                Stage::Released => Redelivery::Release(entry.packet_id),
            })
            .collect()
    }
}

/// Handle to the live connection currently owning a [`SessionState`].
#[derive(Debug, Clone)]
pub struct SessionLease {
    id: u64,
    shutdown: Arc<watch::Sender<Option<CloseReason>>>,
    stopped: watch::Receiver<bool>,
}

impl SessionLease {
    pub fn new(
        shutdown: Arc<watch::Sender<Option<CloseReason>>>,
        stopped: watch::Receiver<bool>,
    ) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            shutdown,
            stopped,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Asks the connection to close. Only the first reason is kept.
    pub fn close(&self, reason: CloseReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Resolves once the connection has released the state.
    pub async fn stopped(&self) {
        let mut stopped = self.stopped.clone();
        // An Err means the connection is gone entirely.
        let _ = stopped.wait_for(|done| *done).await;
    }
}

/// Broker-side state for one client id. Outlives connections when the
/// client asked for a persistent session.
#[derive(Debug)]
pub struct SessionState {
    client_id: String,
    created_at: DateTime<Utc>,
    subscriptions: SubscriptionTable,
    outgoing: OutgoingQueue,
    in_flight: Mutex<InFlightWindow>,
    window_released: Notify,
    incoming_qos2: Mutex<HashSet<u16>>,
    will: Mutex<Option<Message>>,
    active: AtomicBool,
    owner: Mutex<Option<SessionLease>>,
}

impl SessionState {
    pub fn new(client_id: impl Into<String>, queue_capacity: usize) -> Self {
        Self {
            client_id: client_id.into(),
            created_at: Utc::now(),
            subscriptions: SubscriptionTable::new(),
            outgoing: OutgoingQueue::new(queue_capacity),
            in_flight: Mutex::new(InFlightWindow::default()),
            window_released: Notify::new(),
            incoming_qos2: Mutex::new(HashSet::new()),
            will: Mutex::new(None),
            active: AtomicBool::new(false),
            owner: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.subscriptions
    }

    pub fn outgoing(&self) -> &OutgoingQueue {
        &self.outgoing
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    pub fn set_will(&self, will: Option<Message>) {
        *self.will.lock() = will;
    }

    pub fn take_will(&self) -> Option<Message> {
        self.will.lock().take()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn redelivery(&self) -> Vec<Redelivery> {
        self.in_flight.lock().redelivery()
    }

    /// Waits until fewer than `limit` messages are in flight, then records
    /// `publish` and returns its packet id.
    pub async fn reserve_in_flight(&self, limit: usize, publish: PublishDescriptor) -> u16 {
        loop {
            {
                let mut window = self.in_flight.lock();
                if window.len() < limit {
                    return window.insert(publish);
                }
            }
            self.window_released.notified().await;
        }
    }

    pub fn ack(&self, packet_id: u16) -> bool {
        let done = self.in_flight.lock().ack(packet_id);
        if done {
            self.window_released.notify_one();
        }
        done
    }

    pub fn received(&self, packet_id: u16) -> bool {
        self.in_flight.lock().received(packet_id)
    }

    pub fn complete(&self, packet_id: u16) -> bool {
        let done = self.in_flight.lock().complete(packet_id);
        if done {
            self.window_released.notify_one();
        }
        done
    }

    pub fn abandon(&self, packet_id: u16) -> bool {
        let done = self.in_flight.lock().abandon(packet_id);
        if done {
            self.window_released.notify_one();
        }
        done
    }

    /// Registers an inbound QoS 2 packet id. Returns `false` if it was
    /// already pending, which marks a retransmission.
    pub fn begin_incoming(&self, packet_id: u16) -> bool {
        self.incoming_qos2.lock().insert(packet_id)
    }

    pub fn is_incoming_pending(&self, packet_id: u16) -> bool {
        self.incoming_qos2.lock().contains(&packet_id)
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming_qos2.lock().len()
    }

    /// PUBREL: releases an inbound QoS 2 packet id.
    pub fn release_incoming(&self, packet_id: u16) -> bool {
        self.incoming_qos2.lock().remove(&packet_id)
    }

    pub fn enqueue(&self, item: Outgoing) -> Result<(), SessionError> {
        self.outgoing.enqueue(item)
    }

    pub fn owner(&self) -> Option<SessionLease> {
        self.owner.lock().clone()
    }

    /// Installs a new owner and returns the previous one.
    pub fn attach(&self, lease: SessionLease) -> Option<SessionLease> {
        self.owner.lock().replace(lease)
    }

    /// Clears the owner if it is still `lease_id`.
    pub fn detach(&self, lease_id: u64) -> bool {
        let mut owner = self.owner.lock();
        if owner.as_ref().map(SessionLease::id) == Some(lease_id) {
            *owner = None;
            true
        } else {
            false
        }
    }

    /// Signals the current owner, if any, to close.
    pub fn close_owner(&self, reason: CloseReason) {
        if let Some(owner) = self.owner.lock().as_ref() {
            owner.close(reason);
        }
    }
}

