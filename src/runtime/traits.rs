//! Application callback traits.
//!
//! The sync loop hands every delivered PUBLISH to a [`MessageSink`] together
//! with lifecycle notifications. Sinks are invoked outside the session lock,
//! so a sink may call back into the client (for example to publish a reply).
//!
//! The trait is dyn-compatible: `&mut dyn MessageSink` can be stored in a
//! `StaticCell` and handed to an Embassy task without generic parameters.

use crate::packet::{PacketType, QoS};

/// Non-message notifications reported by the sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttEvent {
    /// The broker accepted the connection.
    Connected { session_present: bool },
    /// A SUBACK arrived. `granted` is `None` when the broker rejected the filter.
    Subscribed {
        packet_id: u16,
        granted: Option<QoS>,
    },
    Unsubscribed { packet_id: u16 },
    /// A QoS 1 or QoS 2 publish completed its handshake.
    Published { packet_id: u16 },
    /// An acknowledgment that matches no in-flight record. It is ignored.
    UnexpectedAck { kind: PacketType, packet_id: u16 },
    PingResponse,
}

/// Receives application messages from the sync loop.
///
/// # Example
///
/// ```ignore
/// struct Thermostat {
///     target: Option<f32>,
/// }
///
/// impl MessageSink for Thermostat {
///     fn on_message(&mut self, topic: &str, payload: &[u8], _qos: QoS) {
///         if topic == "home/thermostat/set" {
///             self.target = core::str::from_utf8(payload)
///                 .ok()
///                 .and_then(|s| s.parse().ok());
///         }
///     }
/// }
/// ```
pub trait MessageSink {
    /// Called for every PUBLISH delivered to the application.
    ///
    /// QoS 2 messages are delivered once, when the broker releases them.
    fn on_message(&mut self, topic: &str, payload: &[u8], qos: QoS);

    /// Called for lifecycle and handshake notifications.
    ///
    /// The default implementation ignores them.
    fn on_event(&mut self, _event: MqttEvent) {}
}

/// A sink that drops everything.
pub struct NoopSink;

impl MessageSink for NoopSink {
    fn on_message(&mut self, _topic: &str, _payload: &[u8], _qos: QoS) {}
}

/// Adapts a closure into a [`MessageSink`].
pub struct FnSink<F>(pub F);

/// Creates a sink that calls `f` for every delivered message.
pub fn from_fn<F>(f: F) -> FnSink<F>
where
    F: FnMut(&str, &[u8], QoS),
{
    FnSink(f)
}

impl<F> MessageSink for FnSink<F>
where
    F: FnMut(&str, &[u8], QoS),
{
    fn on_message(&mut self, topic: &str, payload: &[u8], qos: QoS) {
        (self.0)(topic, payload, qos)
    }
}

/// A composite sink that forwards everything to two sinks.
pub struct SinkPair<S1, S2> {
    pub first: S1,
    pub second: S2,
}

impl<S1, S2> SinkPair<S1, S2> {
    pub fn new(first: S1, second: S2) -> Self {
        Self { first, second }
    }
}

impl<S1, S2> MessageSink for SinkPair<S1, S2>
where
    S1: MessageSink,
    S2: MessageSink,
{
    fn on_message(&mut self, topic: &str, payload: &[u8], qos: QoS) {
        self.first.on_message(topic, payload, qos);
        self.second.on_message(topic, payload, qos);
    }

    fn on_event(&mut self, event: MqttEvent) {
        self.first.on_event(event);
        self.second.on_event(event);
    }
}

/// Allows using `&mut dyn MessageSink` wherever `MessageSink` is expected.
impl<S: MessageSink + ?Sized> MessageSink for &mut S {
    fn on_message(&mut self, topic: &str, payload: &[u8], qos: QoS) {
        (**self).on_message(topic, payload, qos)
    }

    fn on_event(&mut self, event: MqttEvent) {
        (**self).on_event(event)
    }
}
