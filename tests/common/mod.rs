#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::task::Poll;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::Instant;
use myrtio_mqtt_sync::error::ConnectReasonCode;
use myrtio_mqtt_sync::packet::{self, ConnAck, EncodePacket, Packet, PacketType, QoS};
use myrtio_mqtt_sync::{MessageSink, MqttClient, MqttEvent, MqttTransport, SyncLoop};

pub type Client<'b> = MqttClient<'b, NoopRawMutex, MockTransport>;
pub type Loop<'a, 'b> = SyncLoop<'a, 'b, NoopRawMutex, MockTransport, Recorder>;

pub fn at(ms: u64) -> Instant {
    Instant::from_millis(ms)
}

// -------------------------
// Scripted broker connection
// -------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockError;

#[derive(Debug, Default)]
pub struct Wire {
    /// Bytes the broker sends to the client.
    pub inbound: VecDeque<u8>,
    /// Bytes the client wrote.
    pub outbound: Vec<u8>,
    pub peer_closed: bool,
    pub closed: bool,
    /// Largest number of bytes accepted per write, `None` for unlimited.
    pub write_limit: Option<usize>,
    /// Largest number of bytes returned per read, `None` for unlimited.
    pub read_limit: Option<usize>,
    /// Every write reports "would block".
    pub write_blocked: bool,
    /// Total bytes accepted before writes report "would block".
    pub write_budget: Option<usize>,
    pub fail_writes: bool,
}

/// A transport handle sharing its wire with the test body.
#[derive(Clone, Default)]
pub struct MockTransport {
    wire: Arc<Mutex<Wire>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wire<R>(&self, f: impl FnOnce(&mut Wire) -> R) -> R {
        f(&mut self.wire.lock().unwrap())
    }

    pub fn feed(&self, packet: &Packet<'_>) {
        let mut buf = vec![0u8; packet.encoded_len()];
        packet.encode(&mut buf).unwrap();
        self.feed_bytes(&buf);
    }

    pub fn feed_bytes(&self, bytes: &[u8]) {
        self.with_wire(|w| w.inbound.extend(bytes.iter().copied()));
    }

    pub fn take_written(&self) -> Vec<u8> {
        self.with_wire(|w| std::mem::take(&mut w.outbound))
    }

    /// Decodes everything the client wrote since the last call.
    pub fn take_sent(&self) -> Vec<Sent> {
        let bytes = self.take_written();
        let mut sent = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let (packet, len) = packet::decode(&bytes[offset..])
                .unwrap()
                .expect("client wrote a truncated frame");
            sent.push(Sent::from(&packet));
            offset += len;
        }
        sent
    }

    pub fn take_kinds(&self) -> Vec<PacketType> {
        self.take_sent().into_iter().map(|s| s.kind).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.with_wire(|w| w.closed)
    }
}

impl MqttTransport for MockTransport {
    type Error = MockError;

    fn try_read(&mut self, buf: &mut [u8]) -> Poll<Result<usize, MockError>> {
        let mut wire = self.wire.lock().unwrap();
        if wire.inbound.is_empty() {
            return if wire.peer_closed {
                Poll::Ready(Ok(0))
            } else {
                Poll::Pending
            };
        }
        let n = buf
            .len()
            .min(wire.inbound.len())
            .min(wire.read_limit.unwrap_or(usize::MAX));
        for slot in &mut buf[..n] {
            *slot = wire.inbound.pop_front().unwrap();
        }
        Poll::Ready(Ok(n))
    }

    fn try_write(&mut self, buf: &[u8]) -> Poll<Result<usize, MockError>> {
        let mut wire = self.wire.lock().unwrap();
        if wire.fail_writes {
            return Poll::Ready(Err(MockError));
        }
        if wire.write_blocked {
            return Poll::Pending;
        }
        let mut n = buf.len().min(wire.write_limit.unwrap_or(usize::MAX));
        if let Some(budget) = wire.write_budget.as_mut() {
            if *budget == 0 {
                return Poll::Pending;
            }
            n = n.min(*budget);
            *budget -= n;
        }
        wire.outbound.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn close(&mut self) {
        self.wire.lock().unwrap().closed = true;
    }
}

/// Owned summary of a packet written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub kind: PacketType,
    pub packet_id: Option<u16>,
    pub dup: bool,
    pub topic: Option<String>,
}

impl From<&Packet<'_>> for Sent {
    fn from(packet: &Packet<'_>) -> Self {
        let (dup, topic) = match packet {
            Packet::Publish(p) => (p.dup, Some(p.topic.to_string())),
            Packet::Subscribe(s) => (false, s.filters.first().map(|(f, _)| f.to_string())),
            Packet::Unsubscribe(u) => (false, u.filters.first().map(|f| f.to_string())),
            _ => (false, None),
        };
        Sent {
            kind: packet.packet_type(),
            packet_id: packet.packet_id(),
            dup,
            topic,
        }
    }
}

// -------------------------
// Recording sink
// -------------------------

#[derive(Debug, Default)]
pub struct Recorder {
    pub messages: Vec<(String, Vec<u8>, QoS)>,
    pub events: Vec<MqttEvent>,
}

impl MessageSink for Recorder {
    fn on_message(&mut self, topic: &str, payload: &[u8], qos: QoS) {
        self.messages.push((topic.to_string(), payload.to_vec(), qos));
    }

    fn on_event(&mut self, event: MqttEvent) {
        self.events.push(event);
    }
}

pub fn connack(session_present: bool) -> Packet<'static> {
    Packet::ConnAck(ConnAck {
        session_present,
        code: ConnectReasonCode::Success,
    })
}
