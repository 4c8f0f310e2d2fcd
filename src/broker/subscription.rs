use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::codec::QoS;
use crate::topic::{is_valid_filter, topic_matches};

/// One session's filters and the QoS granted for each.
///
/// Subscribe and unsubscribe run on the owning session's task while
/// `match_max` runs from any publisher's task, so every operation takes the
/// same short lock. The lock is never held across an await point.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: Mutex<HashMap<Bytes, QoS>>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and stores each `(filter, qos)` pair independently.
    ///
    /// Returns the granted QoS per entry, or `None` for an invalid filter.
    /// Re-subscribing to a filter replaces its QoS.
    pub fn subscribe(&self, filters: &[(Bytes, QoS)]) -> Vec<Option<QoS>> {
        let granted: Vec<Option<QoS>> = filters
            .iter()
            .map(|(filter, qos)| is_valid_filter(filter).then_some(*qos))
            .collect();

        let mut entries = self.entries.lock();
        for ((filter, _), qos) in filters.iter().zip(&granted) {
            if let Some(qos) = qos {
                entries.insert(filter.clone(), *qos);
            }
        }
        granted
    }

    /// Removes each filter; returns whether it was present.
    pub fn unsubscribe(&self, filters: &[Bytes]) -> Vec<bool> {
        let mut removed = Vec::with_capacity(filters.len());
        let mut entries = self.entries.lock();
        for filter in filters {
            removed.push(entries.remove(filter).is_some());
        }
        removed
    }

    /// Highest QoS granted to any filter matching `topic`.
    pub fn match_max(&self, topic: &[u8]) -> Option<QoS> {
        let entries = self.entries.lock();
        let mut best: Option<QoS> = None;
        for (filter, qos) in entries.iter() {
            if best < Some(*qos) && topic_matches(topic, filter) {
                best = Some(*qos);
                if *qos == QoS::ExactlyOnce {
                    break;
                }
            }
        }
        best
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
