use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::codec::{Publish, QoS};
use crate::utils::error::SessionError;

/// A PUBLISH waiting to be written. The packet id is assigned by the
/// producer when the message enters the in-flight window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishDescriptor {
    pub topic: Bytes,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl PublishDescriptor {
    pub fn to_publish(&self, packet_id: Option<u16>) -> Publish {
        Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
            topic: self.topic.clone(),
            packet_id,
            properties: Default::default(),
            payload: self.payload.clone(),
        }
    }
}

/// Deferred-encode unit on a session's outgoing queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// An already encoded control packet.
    Control(Bytes),
    Publish(PublishDescriptor),
}

/// Bounded FIFO between dispatch (many producers) and the session's writer
/// task (single consumer).
#[derive(Debug)]
pub struct OutgoingQueue {
    items: Mutex<VecDeque<Outgoing>>,
    capacity: usize,
    notify: Notify,
}

impl OutgoingQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
            notify: Notify::new(),
        }
    }

    pub fn enqueue(&self, item: Outgoing) -> Result<(), SessionError> {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(SessionError::QueueOverflow);
            }
            items.push_back(item);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub fn try_next(&self) -> Option<Outgoing> {
        self.items.lock().pop_front()
    }

    /// Waits for the next item. Only one task may wait at a time.
    pub async fn next(&self) -> Outgoing {
        loop {
            if let Some(item) = self.try_next() {
                return item;
            }
            self.notify.notified().await;
        }
    }

    /// Puts an item back at the head, ignoring capacity.
    pub fn push_front(&self, item: Outgoing) {
        self.items.lock().push_front(item);
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drops everything a detached session cannot deliver later: control
    /// packets and QoS 0 publishes.
    pub fn discard_transient(&self) {
        self.items.lock().retain(|item| match item {
            Outgoing::Control(_) => false,
            Outgoing::Publish(publish) => publish.qos != QoS::AtMostOnce,
        });
    }
}
