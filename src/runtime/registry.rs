//! Subscription bookkeeping.
//!
//! The set records which filters the client asked for and what the broker
//! granted. It is used to resubscribe after a reconnect, never for matching
//! incoming topics.

use heapless::{String, Vec};

use crate::error::MqttError;
use crate::packet::QoS;
use crate::util::CodecResult;

/// Maximum number of tracked topic filters.
pub const MAX_SUBSCRIPTIONS: usize = 8;
/// Maximum length of a tracked topic filter.
pub const MAX_TOPIC_LEN: usize = 128;

/// A topic filter tracked by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub filter: String<MAX_TOPIC_LEN>,
    /// QoS requested in the last SUBSCRIBE.
    pub requested: QoS,
    /// QoS granted by the broker, `None` until the SUBACK arrives.
    pub granted: Option<QoS>,
    /// Identifier of the SUBSCRIBE or UNSUBSCRIBE still awaiting its ack.
    pub pending: Option<u16>,
}

impl Subscription {
    /// Whether the broker confirmed the filter and nothing is in flight for it.
    pub fn is_active(&self) -> bool {
        self.granted.is_some() && self.pending.is_none()
    }
}

/// The set of topic filters requested by the client.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: Vec<Subscription, MAX_SUBSCRIPTIONS>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that `filter` can be tracked without changing the set.
    pub(crate) fn check(&self, filter: &str) -> CodecResult<()> {
        if filter.len() > MAX_TOPIC_LEN {
            return Err(MqttError::BufferTooSmall);
        }
        if self.get(filter).is_none() && self.entries.is_full() {
            return Err(MqttError::QueueFull);
        }
        Ok(())
    }

    /// Records a SUBSCRIBE for `filter` sent with identifier `packet_id`.
    pub(crate) fn track(&mut self, filter: &str, qos: QoS, packet_id: u16) -> CodecResult<()> {
        if let Some(entry) = self.get_mut(filter) {
            entry.requested = qos;
            entry.pending = Some(packet_id);
            return Ok(());
        }

        let mut owned = String::new();
        owned
            .push_str(filter)
            .map_err(|_| MqttError::BufferTooSmall)?;
        self.entries
            .push(Subscription {
                filter: owned,
                requested: qos,
                granted: None,
                pending: Some(packet_id),
            })
            .map_err(|_| MqttError::QueueFull)
    }

    /// Applies a SUBACK. A rejected filter (`granted == None`) is removed.
    pub(crate) fn confirm(&mut self, packet_id: u16, granted: Option<QoS>) {
        let Some(index) = self.index_pending(packet_id) else {
            return;
        };
        match granted {
            Some(qos) => {
                let entry = &mut self.entries[index];
                entry.granted = Some(qos);
                entry.pending = None;
            }
            None => {
                self.entries.swap_remove(index);
            }
        }
    }

    /// Marks `filter` as being unsubscribed with identifier `packet_id`.
    pub(crate) fn begin_unsubscribe(&mut self, filter: &str, packet_id: u16) {
        if let Some(entry) = self.get_mut(filter) {
            entry.pending = Some(packet_id);
        }
    }

    /// Applies an UNSUBACK.
    pub(crate) fn complete_unsubscribe(&mut self, packet_id: u16) {
        if let Some(index) = self.index_pending(packet_id) {
            self.entries.swap_remove(index);
        }
    }

    /// Forgets filters whose SUBSCRIBE never got an answer.
    pub(crate) fn drop_unconfirmed(&mut self) {
        self.entries.retain(|e| e.granted.is_some());
        for entry in self.entries.iter_mut() {
            entry.pending = None;
        }
    }

    pub fn get(&self, filter: &str) -> Option<&Subscription> {
        self.entries.iter().find(|e| e.filter.as_str() == filter)
    }

    fn get_mut(&mut self, filter: &str) -> Option<&mut Subscription> {
        self.entries.iter_mut().find(|e| e.filter.as_str() == filter)
    }

    fn index_pending(&self, packet_id: u16) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.pending == Some(packet_id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Subscription> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
