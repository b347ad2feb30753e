//! Session bookkeeping: the outbound frame queue, the in-flight table, the
//! store for incoming QoS 2 messages, packet identifiers and keep-alive timing.
//!
//! Nothing in here performs I/O. The client mutates these structures under its
//! session lock and the sync loop moves bytes between them and the transport.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::error::MqttError;
use crate::packet::{EncodePacket, Packet, PacketType, PUBLISH_DUP_FLAG, Publish, QoS};
use crate::util::CodecResult;

/// Default number of frames held by the outbound queue, including frames
/// kept for retransmission.
pub const DEFAULT_FRAMES: usize = 16;
/// Default number of outgoing PUBLISH / SUBSCRIBE / UNSUBSCRIBE handshakes.
pub const DEFAULT_INFLIGHT: usize = 8;
/// Encoded size of PUBACK, PUBREC, PUBREL and PUBCOMP.
const ACK_FRAME_LEN: usize = 4;

/// Transmission lane of a queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lane {
    /// Acknowledgments and pings, sent ahead of application traffic.
    Priority,
    Normal,
}

/// Which frames may go on the wire in the current connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Only CONNECT; everything else waits for the CONNACK.
    ConnectOnly,
    All,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    seq: u32,
    kind: PacketType,
    offset: usize,
    len: usize,
    lane: Lane,
    /// Kept in the arena after it is written, until released by an ack.
    awaits_ack: bool,
    sent: bool,
}

/// A frame whose last byte has just been handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Written {
    pub seq: u32,
    pub kind: PacketType,
    pub awaits_ack: bool,
}

/// Ordered queue of serialized frames, stored back to back in a caller
/// provided byte arena.
///
/// Normal frames never take the last frame slots and arena bytes: those are
/// kept for acknowledgments, so an incoming message can always be acked.
pub(crate) struct Outbox<'b, const FRAMES: usize> {
    arena: &'b mut [u8],
    tail: usize,
    frames: Vec<Frame, FRAMES>,
    next_seq: u32,
    /// Frame being written and the number of bytes already accepted.
    current: Option<(u32, usize)>,
}

impl<'b, const FRAMES: usize> Outbox<'b, FRAMES> {
    /// Frame slots only the priority lane may use.
    pub const RESERVED_FRAMES: usize = if FRAMES >= 8 { 4 } else { FRAMES / 2 };
    /// Arena bytes only the priority lane may use.
    pub const RESERVED_BYTES: usize = Self::RESERVED_FRAMES * ACK_FRAME_LEN;

    pub fn new(arena: &'b mut [u8]) -> Self {
        Self {
            arena,
            tail: 0,
            frames: Vec::new(),
            next_seq: 0,
            current: None,
        }
    }

    /// Serializes `packet` at the end of the queue and returns its sequence number.
    pub fn push(&mut self, packet: &Packet<'_>, lane: Lane, awaits_ack: bool) -> CodecResult<u32> {
        let len = packet.encoded_len();
        let (reserved_frames, reserved_bytes) = match lane {
            Lane::Priority => (0, 0),
            Lane::Normal => (Self::RESERVED_FRAMES, Self::RESERVED_BYTES),
        };
        if len + reserved_bytes > self.arena.len() {
            return Err(MqttError::BufferTooSmall);
        }
        if self.frames.len() + reserved_frames >= FRAMES {
            return Err(MqttError::QueueFull);
        }
        let used: usize = self.frames.iter().map(|f| f.len).sum();
        if self.arena.len() - used < len + reserved_bytes {
            return Err(MqttError::QueueFull);
        }
        if self.arena.len() - self.tail < len {
            self.compact();
        }

        let offset = self.tail;
        packet.encode(&mut self.arena[offset..offset + len])?;
        let seq = self.next_seq;
        self.frames
            .push(Frame {
                seq,
                kind: packet.packet_type(),
                offset,
                len,
                lane,
                awaits_ack,
                sent: false,
            })
            .map_err(|_| MqttError::QueueFull)?;
        self.tail += len;
        self.next_seq = self.next_seq.wrapping_add(1);
        Ok(seq)
    }

    fn position(&self, seq: u32) -> Option<usize> {
        self.frames.iter().position(|f| f.seq == seq)
    }

    fn select(&self, gate: Gate) -> Option<usize> {
        if let Some((seq, _)) = self.current {
            return self.position(seq);
        }
        let eligible = |f: &&Frame| {
            !f.sent && (gate == Gate::All || f.kind == PacketType::Connect)
        };
        self.frames
            .iter()
            .filter(eligible)
            .find(|f| f.lane == Lane::Priority)
            .or_else(|| self.frames.iter().find(eligible))
            .and_then(|f| self.position(f.seq))
    }

    /// Copies the next bytes to transmit into `out`.
    ///
    /// Returns the sequence number of the frame they belong to and how many
    /// bytes were copied, or `None` when nothing is eligible.
    pub fn next_chunk(&self, gate: Gate, out: &mut [u8]) -> Option<(u32, usize)> {
        let frame = self.frames[self.select(gate)?];
        let written = match self.current {
            Some((seq, written)) if seq == frame.seq => written,
            _ => 0,
        };
        let remaining = &self.arena[frame.offset + written..frame.offset + frame.len];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        Some((frame.seq, n))
    }

    /// Records that `n` bytes of frame `seq` were accepted by the transport.
    pub fn advance(&mut self, seq: u32, n: usize) -> Option<Written> {
        let index = self.position(seq)?;
        let frame = self.frames[index];
        let written = match self.current {
            Some((current, written)) if current == seq => written + n,
            _ => n,
        };
        if written < frame.len {
            self.current = Some((seq, written));
            return None;
        }

        self.current = None;
        if frame.awaits_ack {
            self.frames[index].sent = true;
        } else {
            self.frames.remove(index);
        }
        Some(Written {
            seq,
            kind: frame.kind,
            awaits_ack: frame.awaits_ack,
        })
    }

    /// Drops a frame once its handshake is complete.
    ///
    /// A frame that is half written is finished first and dropped afterwards.
    pub fn release(&mut self, seq: u32) {
        let Some(index) = self.position(seq) else {
            return;
        };
        if matches!(self.current, Some((current, _)) if current == seq) {
            self.frames[index].awaits_ack = false;
        } else {
            self.frames.remove(index);
        }
    }

    /// Queues a sent frame for another transmission, setting DUP on a PUBLISH.
    pub fn resend(&mut self, seq: u32) -> bool {
        let Some(index) = self.position(seq) else {
            return false;
        };
        let frame = &mut self.frames[index];
        if !frame.sent {
            return false;
        }
        frame.sent = false;
        if frame.kind == PacketType::Publish {
            self.arena[frame.offset] |= PUBLISH_DUP_FLAG;
        }
        true
    }

    /// Prepares the queue for a resumed session on a new connection.
    ///
    /// Frames awaiting an acknowledgment are queued again (PUBLISH with DUP),
    /// application frames that were never written stay queued, and control
    /// frames of the old connection are dropped.
    pub fn prepare_resume(&mut self) {
        self.current = None;
        self.frames.retain(|f| {
            f.awaits_ack
                || (f.lane == Lane::Normal
                    && !matches!(f.kind, PacketType::Connect | PacketType::Disconnect))
        });
        for frame in self.frames.iter_mut() {
            if frame.sent {
                frame.sent = false;
                if frame.kind == PacketType::Publish {
                    self.arena[frame.offset] |= PUBLISH_DUP_FLAG;
                }
            }
        }
    }

    /// Drops every frame of the given kind.
    pub fn remove_kind(&mut self, kind: PacketType) {
        if let Some((seq, _)) = self.current {
            if self.frames.iter().any(|f| f.seq == seq && f.kind == kind) {
                self.current = None;
            }
        }
        self.frames.retain(|f| f.kind != kind);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.tail = 0;
        self.current = None;
    }

    /// Number of frames still waiting to be written.
    pub fn unsent_len(&self) -> usize {
        self.frames.iter().filter(|f| !f.sent).count()
    }

    fn compact(&mut self) {
        let mut dst = 0;
        for frame in self.frames.iter_mut() {
            if frame.offset != dst {
                self.arena
                    .copy_within(frame.offset..frame.offset + frame.len, dst);
                frame.offset = dst;
            }
            dst += frame.len;
        }
        self.tail = dst;
    }
}

/// Handshake stage of an in-flight record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Stage {
    /// QoS 1 PUBLISH sent, waiting for PUBACK.
    AwaitPubAck,
    /// QoS 2 PUBLISH sent, waiting for PUBREC.
    AwaitPubRec,
    /// PUBREL sent, waiting for PUBCOMP.
    AwaitPubComp,
    AwaitSubAck,
    AwaitUnsubAck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InflightEntry {
    pub packet_id: u16,
    pub qos: QoS,
    pub stage: Stage,
    /// Sequence number of the frame to retransmit.
    pub frame: u32,
    pub retries: u8,
    /// When the frame was last written, `None` while it is queued.
    pub sent_at: Option<Instant>,
}

/// Pending outgoing handshakes, keyed by packet identifier.
pub(crate) struct InflightTable<const N: usize> {
    entries: Vec<InflightEntry, N>,
}

impl<const N: usize> InflightTable<N> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.is_full()
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.get(packet_id).is_some()
    }

    pub fn get(&self, packet_id: u16) -> Option<&InflightEntry> {
        self.entries.iter().find(|e| e.packet_id == packet_id)
    }

    pub fn get_mut(&mut self, packet_id: u16) -> Option<&mut InflightEntry> {
        self.entries.iter_mut().find(|e| e.packet_id == packet_id)
    }

    /// Returns the entry for `packet_id` if it is at `stage`.
    pub fn at_stage(&mut self, packet_id: u16, stage: Stage) -> Option<&mut InflightEntry> {
        self.get_mut(packet_id).filter(|e| e.stage == stage)
    }

    pub fn insert(&mut self, entry: InflightEntry) -> CodecResult<()> {
        self.entries.push(entry).map_err(|_| MqttError::QueueFull)
    }

    pub fn remove(&mut self, packet_id: u16) -> Option<InflightEntry> {
        let index = self.entries.iter().position(|e| e.packet_id == packet_id)?;
        Some(self.entries.swap_remove(index))
    }

    /// Stamps the entry owning frame `seq` with its transmission time.
    pub fn mark_sent(&mut self, seq: u32, now: Instant) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.frame == seq) {
            entry.sent_at = Some(now);
        }
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut InflightEntry> {
        self.entries.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Record header: packet id (2), topic length (2), payload length (4).
const RECORD_HEADER: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Record {
    start: usize,
    packet_id: u16,
    topic_len: usize,
    payload_len: usize,
}

impl Record {
    fn body(&self) -> core::ops::Range<usize> {
        self.start + RECORD_HEADER..self.end()
    }

    fn end(&self) -> usize {
        self.start + RECORD_HEADER + self.topic_len + self.payload_len
    }
}

/// Incoming QoS 2 messages held until the broker releases them.
///
/// Messages are packed back to back in a caller provided arena, each behind
/// an 8 byte header, so capacity is only bounded by the arena size.
pub(crate) struct IncomingStore<'b> {
    arena: &'b mut [u8],
    used: usize,
}

impl<'b> IncomingStore<'b> {
    pub fn new(arena: &'b mut [u8]) -> Self {
        Self { arena, used: 0 }
    }

    fn record_at(&self, start: usize) -> Record {
        let h = &self.arena[start..start + RECORD_HEADER];
        Record {
            start,
            packet_id: u16::from_be_bytes([h[0], h[1]]),
            topic_len: u16::from_be_bytes([h[2], h[3]]) as usize,
            payload_len: u32::from_be_bytes([h[4], h[5], h[6], h[7]]) as usize,
        }
    }

    fn find(&self, packet_id: u16) -> Option<Record> {
        let mut start = 0;
        while start < self.used {
            let record = self.record_at(start);
            if record.packet_id == packet_id {
                return Some(record);
            }
            start = record.end();
        }
        None
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.find(packet_id).is_some()
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut start = 0;
        while start < self.used {
            start = self.record_at(start).end();
            count += 1;
        }
        count
    }

    /// Bytes a message with this topic and payload occupies in the arena.
    pub const fn footprint(topic_len: usize, payload_len: usize) -> usize {
        RECORD_HEADER + topic_len + payload_len
    }

    /// Copies the message into the arena.
    ///
    /// Fails with `BufferTooSmall` when the arena has no room left for it.
    pub fn store(&mut self, packet_id: u16, publish: &Publish<'_>) -> CodecResult<()> {
        let topic = publish.topic.as_bytes();
        let payload = publish.payload;
        let len = Self::footprint(topic.len(), payload.len());
        if self.arena.len() - self.used < len {
            return Err(MqttError::BufferTooSmall);
        }

        let record = &mut self.arena[self.used..self.used + len];
        let (header, body) = record.split_at_mut(RECORD_HEADER);
        header[0..2].copy_from_slice(&packet_id.to_be_bytes());
        header[2..4].copy_from_slice(&(topic.len() as u16).to_be_bytes());
        header[4..8].copy_from_slice(&(payload.len() as u32).to_be_bytes());
        body[..topic.len()].copy_from_slice(topic);
        body[topic.len()..].copy_from_slice(payload);
        self.used += len;
        Ok(())
    }

    /// Moves message `packet_id` into `out`, topic first, then payload.
    ///
    /// Returns the topic and payload lengths, or `None` for an unknown id.
    /// When `out` is too short the message stays stored.
    pub fn take_into(&mut self, packet_id: u16, out: &mut [u8]) -> CodecResult<Option<(usize, usize)>> {
        let Some(record) = self.find(packet_id) else {
            return Ok(None);
        };
        let body = record.body();
        let target = out.get_mut(..body.len()).ok_or(MqttError::BufferTooSmall)?;
        target.copy_from_slice(&self.arena[body]);

        let end = record.end();
        self.arena.copy_within(end..self.used, record.start);
        self.used -= end - record.start;
        Ok(Some((record.topic_len, record.payload_len)))
    }

    pub fn clear(&mut self) {
        self.used = 0;
    }
}

/// Monotonic 16-bit packet identifier counter.
pub(crate) struct PacketIdAllocator {
    next: u16,
}

impl PacketIdAllocator {
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns the next identifier for which `in_use` is false, skipping 0.
    pub fn allocate(&mut self, in_use: impl Fn(u16) -> bool) -> Option<u16> {
        for _ in 0..u16::MAX {
            let id = self.next;
            self.next = self.next.checked_add(1).unwrap_or(1);
            if !in_use(id) {
                return Some(id);
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ping {
    Idle,
    Queued,
    Sent(Instant),
}

/// Keep-alive deadlines of the current connection.
pub(crate) struct KeepAlive {
    interval: Duration,
    last_sent: Option<Instant>,
    connect_sent_at: Option<Instant>,
    ping: Ping,
}

impl KeepAlive {
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            connect_sent_at: None,
            ping: Ping::Idle,
        }
    }

    fn enabled(&self) -> bool {
        self.interval.as_ticks() > 0
    }

    fn expired(&self, since: Instant, now: Instant) -> bool {
        now.saturating_duration_since(since) >= self.interval
    }

    pub fn on_bytes_written(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn on_connect_written(&mut self, now: Instant) {
        self.connect_sent_at = Some(now);
    }

    pub fn on_connack(&mut self) {
        self.connect_sent_at = None;
    }

    pub fn on_ping_queued(&mut self) {
        self.ping = Ping::Queued;
    }

    pub fn on_ping_written(&mut self, now: Instant) {
        self.ping = Ping::Sent(now);
    }

    pub fn on_ping_response(&mut self) {
        self.ping = Ping::Idle;
    }

    /// CONNECT was written and no CONNACK arrived within the interval.
    pub fn connack_overdue(&self, now: Instant) -> bool {
        self.enabled() && matches!(self.connect_sent_at, Some(at) if self.expired(at, now))
    }

    /// PINGREQ was written and no PINGRESP arrived within the interval.
    pub fn ping_overdue(&self, now: Instant) -> bool {
        self.enabled() && matches!(self.ping, Ping::Sent(at) if self.expired(at, now))
    }

    /// Nothing was written for a whole interval and no ping is pending.
    pub fn ping_due(&self, now: Instant) -> bool {
        self.enabled()
            && self.ping == Ping::Idle
            && matches!(self.last_sent, Some(at) if self.expired(at, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{self, Subscribe};

    fn publish(topic: &str, qos: QoS, packet_id: Option<u16>) -> Packet<'_> {
        Packet::Publish(Publish {
            packet_id,
            ..Publish::new(topic, b"x", qos)
        })
    }

    fn drain(outbox: &mut Outbox<'_, 16>, gate: Gate) -> Vec<PacketType, 16> {
        let mut kinds = Vec::new();
        let mut chunk = [0u8; 64];
        while let Some((seq, n)) = outbox.next_chunk(gate, &mut chunk) {
            let (packet, _) = packet::decode(&chunk[..n]).unwrap().unwrap();
            kinds.push(packet.packet_type()).unwrap();
            outbox.advance(seq, n);
        }
        kinds
    }

    #[test]
    fn priority_frames_jump_the_queue() {
        let mut arena = [0u8; 256];
        let mut outbox = Outbox::<16>::new(&mut arena);
        outbox.push(&publish("a", QoS::AtMostOnce, None), Lane::Normal, false).unwrap();
        outbox.push(&Packet::PubAck(3), Lane::Priority, false).unwrap();
        outbox.push(&Packet::PingReq, Lane::Priority, false).unwrap();

        assert_eq!(
            drain(&mut outbox, Gate::All).as_slice(),
            &[PacketType::PubAck, PacketType::PingReq, PacketType::Publish]
        );
        assert_eq!(outbox.unsent_len(), 0);
    }

    #[test]
    fn partially_written_frame_is_completed_first() {
        let mut arena = [0u8; 256];
        let mut outbox = Outbox::<16>::new(&mut arena);
        let seq = outbox
            .push(&publish("topic", QoS::AtMostOnce, None), Lane::Normal, false)
            .unwrap();

        let mut chunk = [0u8; 3];
        let (picked, n) = outbox.next_chunk(Gate::All, &mut chunk).unwrap();
        assert_eq!((picked, n), (seq, 3));
        assert_eq!(outbox.advance(seq, 2), None);

        outbox.push(&Packet::PubAck(1), Lane::Priority, false).unwrap();
        let (next, _) = outbox.next_chunk(Gate::All, &mut chunk).unwrap();
        assert_eq!(next, seq);
    }

    #[test]
    fn connecting_gate_only_lets_connect_through() {
        let mut arena = [0u8; 256];
        let mut outbox = Outbox::<16>::new(&mut arena);
        outbox.push(&publish("a", QoS::AtMostOnce, None), Lane::Normal, false).unwrap();
        outbox
            .push(
                &Packet::Connect(packet::Connect::new("id", 5, true)),
                Lane::Priority,
                false,
            )
            .unwrap();

        assert_eq!(
            drain(&mut outbox, Gate::ConnectOnly).as_slice(),
            &[PacketType::Connect]
        );
        assert_eq!(outbox.unsent_len(), 1);
    }

    #[test]
    fn released_space_is_reused() {
        let mut arena = [0u8; 40];
        let mut outbox = Outbox::<16>::new(&mut arena);
        let first = outbox
            .push(&publish("aaaa", QoS::AtLeastOnce, Some(1)), Lane::Normal, true)
            .unwrap();
        let second = outbox
            .push(&publish("bbbb", QoS::AtLeastOnce, Some(2)), Lane::Normal, true)
            .unwrap();
        assert_eq!(
            outbox.push(&publish("cccc", QoS::AtLeastOnce, Some(3)), Lane::Normal, true),
            Err(MqttError::QueueFull)
        );

        outbox.release(first);
        outbox
            .push(&publish("cccc", QoS::AtLeastOnce, Some(3)), Lane::Normal, true)
            .unwrap();

        let mut chunk = [0u8; 32];
        let (seq, n) = outbox.next_chunk(Gate::All, &mut chunk).unwrap();
        assert_eq!(seq, second);
        let (packet, _) = packet::decode(&chunk[..n]).unwrap().unwrap();
        assert_eq!(packet.packet_id(), Some(2));
    }

    #[test]
    fn acknowledgments_use_the_reserved_budget() {
        let mut arena = [0u8; 256];
        let mut outbox = Outbox::<8>::new(&mut arena);
        for _ in 0..4 {
            outbox.push(&publish("a", QoS::AtMostOnce, None), Lane::Normal, false).unwrap();
        }
        assert_eq!(
            outbox.push(&publish("a", QoS::AtMostOnce, None), Lane::Normal, false),
            Err(MqttError::QueueFull)
        );

        for id in 1..=4 {
            outbox.push(&Packet::PubAck(id), Lane::Priority, false).unwrap();
        }
        assert_eq!(
            outbox.push(&Packet::PubAck(5), Lane::Priority, false),
            Err(MqttError::QueueFull)
        );
    }

    #[test]
    fn incoming_store_is_bounded_by_its_arena() {
        assert_eq!(IncomingStore::footprint(1, 4), 13);
        let mut arena = [0u8; 26];
        let mut store = IncomingStore::new(&mut arena);
        let message = Publish::new("t", b"data", QoS::ExactlyOnce);

        store.store(1, &message).unwrap();
        store.store(2, &message).unwrap();
        assert_eq!(store.store(3, &message), Err(MqttError::BufferTooSmall));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn taking_a_message_keeps_the_others() {
        let mut arena = [0u8; 128];
        let mut store = IncomingStore::new(&mut arena);
        store.store(1, &Publish::new("a", b"first", QoS::ExactlyOnce)).unwrap();
        store.store(2, &Publish::new("bb", b"second", QoS::ExactlyOnce)).unwrap();
        store.store(3, &Publish::new("ccc", b"third", QoS::ExactlyOnce)).unwrap();

        let mut short = [0u8; 4];
        assert_eq!(store.take_into(2, &mut short), Err(MqttError::BufferTooSmall));
        assert!(store.contains(2));

        let mut out = [0u8; 32];
        assert_eq!(store.take_into(2, &mut out), Ok(Some((2, 6))));
        assert_eq!(&out[..8], b"bbsecond");
        assert!(!store.contains(2));
        assert_eq!(store.len(), 2);

        assert_eq!(store.take_into(3, &mut out), Ok(Some((3, 5))));
        assert_eq!(&out[..8], b"cccthird");
        assert_eq!(store.take_into(2, &mut out), Ok(None));
        assert!(store.contains(1));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut arena = [0u8; 8];
        let mut outbox = Outbox::<16>::new(&mut arena);
        assert_eq!(
            outbox.push(
                &Packet::Subscribe(Subscribe::new(1, "a/long/filter", QoS::AtMostOnce)),
                Lane::Normal,
                true
            ),
            Err(MqttError::BufferTooSmall)
        );
    }

    #[test]
    fn resume_resends_unacked_publish_with_dup() {
        let mut arena = [0u8; 128];
        let mut outbox = Outbox::<16>::new(&mut arena);
        outbox.push(&publish("t", QoS::AtLeastOnce, Some(9)), Lane::Normal, true).unwrap();
        let mut chunk = [0u8; 64];
        let (seq, n) = outbox.next_chunk(Gate::All, &mut chunk).unwrap();
        outbox.advance(seq, n);
        outbox.push(&Packet::PubAck(4), Lane::Priority, false).unwrap();
        assert_eq!(outbox.unsent_len(), 1);

        outbox.prepare_resume();

        let (_, n) = outbox.next_chunk(Gate::All, &mut chunk).unwrap();
        let (packet, _) = packet::decode(&chunk[..n]).unwrap().unwrap();
        match packet {
            Packet::Publish(p) => {
                assert!(p.dup);
                assert_eq!(p.packet_id, Some(9));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(outbox.unsent_len(), 1);
    }

    #[test]
    fn packet_ids_skip_zero_and_ids_in_use() {
        let mut ids = PacketIdAllocator { next: u16::MAX };
        assert_eq!(ids.allocate(|_| false), Some(u16::MAX));
        assert_eq!(ids.allocate(|id| id == 1), Some(2));
    }

    #[test]
    fn keep_alive_deadlines() {
        let mut timer = KeepAlive::new(Duration::from_secs(5));
        timer.on_bytes_written(Instant::from_millis(0));
        assert!(!timer.ping_due(Instant::from_millis(4_900)));
        assert!(timer.ping_due(Instant::from_millis(5_000)));

        timer.on_ping_queued();
        assert!(!timer.ping_due(Instant::from_millis(5_000)));
        timer.on_ping_written(Instant::from_millis(5_000));
        assert!(!timer.ping_overdue(Instant::from_millis(9_900)));
        assert!(timer.ping_overdue(Instant::from_millis(10_000)));

        timer.on_ping_response();
        assert!(!timer.ping_overdue(Instant::from_millis(10_000)));
    }

    #[test]
    fn zero_interval_disables_keep_alive() {
        let mut timer = KeepAlive::new(Duration::from_secs(0));
        timer.on_bytes_written(Instant::from_millis(0));
        timer.on_connect_written(Instant::from_millis(0));
        assert!(!timer.ping_due(Instant::from_millis(100_000)));
        assert!(!timer.connack_overdue(Instant::from_millis(100_000)));
    }
}
