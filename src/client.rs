//! # MQTT Client
//!
//! [`MqttClient`] holds the protocol state of one MQTT session: lifecycle
//! state, outbound frame queue, in-flight handshakes, incoming QoS 2 messages
//! and the subscription set. Its methods never touch the network. They
//! serialize packets into the outbound queue and return immediately; the
//! [`SyncLoop`](crate::runtime::SyncLoop) moves the bytes.
//!
//! All state lives behind a single `embassy_sync` blocking mutex, so the client
//! can be shared by reference between tasks (or threads, with
//! `CriticalSectionRawMutex`) while one of them drives the sync loop.
//!
//! ```ignore
//! static CLIENT: StaticCell<MqttClient<'static, CriticalSectionRawMutex, TcpTransport>> =
//!     StaticCell::new();
//!
//! let client = CLIENT.init(MqttClient::new(tx_buffer, incoming_buffer));
//! let options = MqttOptions::new("myrt-device-01").with_keep_alive(Duration::from_secs(15));
//! client.connect(TcpTransport::new(socket), &options)?;
//! client.subscribe("device/cmd", QoS::AtLeastOnce)?;
//! client.publish("device/state", b"online", QoS::AtMostOnce, true)?;
//! ```

use core::cell::RefCell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};

use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::packet::{
    ConnAck, Connect, LastWill, Packet, PacketType, Publish, QoS, SubAck, Subscribe, Unsubscribe,
};
use crate::runtime::registry::{Subscription, SubscriptionSet};
use crate::runtime::traits::MqttEvent;
use crate::session::{
    DEFAULT_FRAMES, DEFAULT_INFLIGHT, Gate, IncomingStore, InflightEntry, InflightTable,
    KeepAlive, Lane, Outbox, PacketIdAllocator, Stage,
};
use crate::transport::MqttTransport;
use crate::util::CodecResult;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    /// CONNECT is queued or written, waiting for CONNACK.
    Connecting,
    Connected,
    /// DISCONNECT is queued and not fully written yet.
    Disconnecting,
    /// A fatal error ended the connection. See [`MqttClient::last_error`].
    Error,
}

/// Configuration options for the MQTT client.
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    keep_alive: Duration,
    clean_session: bool,
    will: Option<LastWill<'a>>,
    username: Option<&'a str>,
    password: Option<&'a [u8]>,
    retry_interval: Option<Duration>,
    resubscribe: bool,
}

impl<'a> MqttOptions<'a> {
    /// Creates options with a 60 second keep-alive and a clean session.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive: Duration::from_secs(60),
            clean_session: true,
            will: None,
            username: None,
            password: None,
            retry_interval: None,
            resubscribe: true,
        }
    }

    /// Sets the keep-alive interval. It is sent in whole seconds, rounded up;
    /// zero disables it.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }

    /// Sets the message the broker publishes if the client vanishes.
    pub fn with_will(mut self, topic: &'a str, message: &'a [u8], qos: QoS, retain: bool) -> Self {
        self.will = Some(LastWill {
            topic,
            message,
            qos,
            retain,
        });
        self
    }

    /// Resends frames still awaiting an acknowledgment after `interval`.
    ///
    /// Disabled by default: unacknowledged frames are only resent when a
    /// session is resumed with `clean_session = false`.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = Some(interval);
        self
    }

    /// Whether confirmed subscriptions are renewed when the broker reports
    /// no session present. Enabled by default.
    pub fn with_resubscribe(mut self, resubscribe: bool) -> Self {
        self.resubscribe = resubscribe;
        self
    }

    pub fn client_id(&self) -> &'a str {
        self.client_id
    }

    /// Keep-alive as sent on the wire, in whole seconds rounded up.
    ///
    /// Only a zero duration disables keep-alive; 500 ms becomes 1 s.
    pub fn keep_alive_secs(&self) -> u16 {
        let millis = self.keep_alive.as_millis();
        millis.div_ceil(1000).min(u16::MAX as u64) as u16
    }
}

/// What the sync loop should do with a decoded packet after the lock is released.
#[derive(Debug)]
pub(crate) enum Dispatch {
    Nothing,
    /// Hand the decoded PUBLISH to the sink.
    Deliver,
    /// PUBCOMP is queued; hand the stored QoS 2 message with this id to the sink.
    Release(u16),
    Event(MqttEvent),
}

/// Instruction for the sync loop regarding the transport it owns.
pub(crate) enum TransportCommand<T> {
    Keep,
    /// Close the current transport, if any, and switch to this one.
    Adopt(T),
    Close,
}

struct Inner<'b, T, const INFLIGHT: usize, const FRAMES: usize> {
    state: ConnectionState,
    last_error: Option<MqttError<()>>,
    staged: Option<T>,
    close_requested: bool,
    outbox: Outbox<'b, FRAMES>,
    inflight: InflightTable<INFLIGHT>,
    incoming: IncomingStore<'b>,
    ids: PacketIdAllocator,
    subscriptions: SubscriptionSet,
    keep_alive: KeepAlive,
    retry_interval: Option<Duration>,
    resubscribe: bool,
}

/// A non-blocking MQTT 3.1.1 client.
///
/// The client is generic over the raw mutex `M` guarding its state and the
/// transport type `T` it hands to the sync loop. `INFLIGHT` bounds the
/// outgoing QoS 1/2, SUBSCRIBE and UNSUBSCRIBE handshakes pending at once and
/// `FRAMES` the number of frames the outbound queue holds.
///
/// Two arenas are borrowed for the lifetime of the client:
///
/// - `tx_buf` holds serialized outbound frames. It must fit the largest
///   packet the application publishes plus the acknowledgment reserve
///   (16 bytes with the default `FRAMES`), and room for frames kept for
///   retransmission.
/// - `incoming_buf` holds QoS 2 messages between PUBLISH and PUBREL, each
///   taking its topic and payload length plus 8 bytes.
pub struct MqttClient<
    'b,
    M: RawMutex,
    T: MqttTransport,
    const INFLIGHT: usize = DEFAULT_INFLIGHT,
    const FRAMES: usize = DEFAULT_FRAMES,
> {
    inner: Mutex<M, RefCell<Inner<'b, T, INFLIGHT, FRAMES>>>,
}

impl<'b, M, T, const INFLIGHT: usize, const FRAMES: usize> MqttClient<'b, M, T, INFLIGHT, FRAMES>
where
    M: RawMutex,
    T: MqttTransport,
{
    pub fn new(tx_buf: &'b mut [u8], incoming_buf: &'b mut [u8]) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(Inner {
                state: ConnectionState::Disconnected,
                last_error: None,
                staged: None,
                close_requested: false,
                outbox: Outbox::new(tx_buf),
                inflight: InflightTable::new(),
                incoming: IncomingStore::new(incoming_buf),
                ids: PacketIdAllocator::new(),
                subscriptions: SubscriptionSet::new(),
                keep_alive: KeepAlive::new(Duration::from_secs(0)),
                retry_interval: None,
                resubscribe: true,
            })),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner<'b, T, INFLIGHT, FRAMES>) -> R) -> R {
        self.inner.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Starts a connection over `transport`, which must already be connected
    /// to the broker.
    ///
    /// Valid in `Disconnected` and `Error`. The transport is handed to the
    /// sync loop on its next call and the CONNECT packet is queued. With
    /// `clean_session = false` unacknowledged frames of the previous
    /// connection are resent (PUBLISH with DUP set).
    pub fn connect(&self, transport: T, options: &MqttOptions<'_>) -> Result<(), MqttError<T::Error>> {
        self.with_inner(|inner| inner.connect(transport, options))
            .map_err(|e| e.widen())
    }

    /// Queues a PUBLISH.
    ///
    /// Returns the packet identifier for QoS 1 and QoS 2, `None` for QoS 0.
    /// While `Connecting` the message waits for the CONNACK.
    pub fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<Option<u16>, MqttError<T::Error>> {
        self.with_inner(|inner| inner.publish(topic, payload, qos, retain))
            .map_err(|e| e.widen())
    }

    /// Queues a SUBSCRIBE for one topic filter and returns its packet identifier.
    pub fn subscribe(&self, filter: &str, qos: QoS) -> Result<u16, MqttError<T::Error>> {
        self.with_inner(|inner| inner.subscribe(filter, qos))
            .map_err(|e| e.widen())
    }

    /// Queues an UNSUBSCRIBE for one topic filter and returns its packet identifier.
    pub fn unsubscribe(&self, filter: &str) -> Result<u16, MqttError<T::Error>> {
        self.with_inner(|inner| inner.unsubscribe(filter))
            .map_err(|e| e.widen())
    }

    /// Ends the session.
    ///
    /// When connected, DISCONNECT is queued after the pending frames and the
    /// transport is closed once it is written. A connection attempt still
    /// waiting for CONNACK is abandoned without sending anything.
    pub fn disconnect(&self) -> Result<(), MqttError<T::Error>> {
        self.with_inner(|inner| inner.disconnect())
            .map_err(|e| e.widen())
    }

    pub fn state(&self) -> ConnectionState {
        self.with_inner(|inner| inner.state)
    }

    /// The error that moved the client into `Error`, if any.
    pub fn last_error(&self) -> Option<MqttError<()>> {
        self.with_inner(|inner| inner.last_error)
    }

    /// Whether an outgoing handshake with this packet identifier is pending.
    pub fn is_inflight(&self, packet_id: u16) -> bool {
        self.with_inner(|inner| inner.inflight.contains(packet_id))
    }

    pub fn inflight_len(&self) -> usize {
        self.with_inner(|inner| inner.inflight.len())
    }

    /// Number of frames waiting to be written to the transport.
    pub fn queued_frames(&self) -> usize {
        self.with_inner(|inner| inner.outbox.unsent_len())
    }

    /// Number of incoming QoS 2 messages waiting for their PUBREL.
    pub fn pending_incoming(&self) -> usize {
        self.with_inner(|inner| inner.incoming.len())
    }

    /// The tracked subscription for `filter`.
    pub fn subscription(&self, filter: &str) -> Option<Subscription> {
        self.with_inner(|inner| inner.subscriptions.get(filter).cloned())
    }

    pub(crate) fn transport_command(&self) -> TransportCommand<T> {
        self.with_inner(|inner| {
            if let Some(transport) = inner.staged.take() {
                inner.close_requested = false;
                TransportCommand::Adopt(transport)
            } else if core::mem::take(&mut inner.close_requested) {
                TransportCommand::Close
            } else {
                TransportCommand::Keep
            }
        })
    }

    pub(crate) fn handle_packet(&self, packet: &Packet<'_>) -> CodecResult<Dispatch> {
        self.with_inner(|inner| inner.handle_packet(packet))
    }

    /// Moves the released QoS 2 message `packet_id` into `out`.
    pub(crate) fn take_incoming(
        &self,
        packet_id: u16,
        out: &mut [u8],
    ) -> CodecResult<Option<(usize, usize)>> {
        self.with_inner(|inner| inner.incoming.take_into(packet_id, out))
    }

    pub(crate) fn check_deadlines(&self, now: Instant) -> CodecResult<()> {
        self.with_inner(|inner| inner.check_deadlines(now))
    }

    pub(crate) fn next_chunk(&self, out: &mut [u8]) -> Option<(u32, usize)> {
        self.with_inner(|inner| inner.next_chunk(out))
    }

    pub(crate) fn advance(&self, seq: u32, n: usize, now: Instant) {
        self.with_inner(|inner| inner.advance(seq, n, now))
    }

    pub(crate) fn fail(&self, error: MqttError<()>) {
        self.with_inner(|inner| {
            error!("connection failed: {:?}", error);
            inner.state = ConnectionState::Error;
            inner.last_error = Some(error);
            inner.close_requested = false;
        })
    }
}

impl<T, const INFLIGHT: usize, const FRAMES: usize> Inner<'_, T, INFLIGHT, FRAMES>
where
    T: MqttTransport,
{
    fn connect(&mut self, transport: T, options: &MqttOptions<'_>) -> CodecResult<()> {
        if !matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Error
        ) {
            return Err(MqttError::AlreadyConnected);
        }

        if options.clean_session {
            self.outbox.clear();
            self.inflight.clear();
            self.incoming.clear();
            self.subscriptions.drop_unconfirmed();
        } else {
            self.outbox.prepare_resume();
            for entry in self.inflight.iter_mut() {
                entry.sent_at = None;
            }
        }

        let keep_alive = options.keep_alive_secs();
        let connect = Connect {
            client_id: options.client_id,
            keep_alive,
            clean_session: options.clean_session,
            will: options.will,
            username: options.username,
            password: options.password,
        };
        self.outbox
            .push(&Packet::Connect(connect), Lane::Priority, false)?;

        if let Some(mut previous) = self.staged.replace(transport) {
            previous.close();
        }
        self.close_requested = false;
        self.keep_alive = KeepAlive::new(Duration::from_secs(keep_alive as u64));
        self.retry_interval = options.retry_interval;
        self.resubscribe = options.resubscribe;
        self.last_error = None;
        self.state = ConnectionState::Connecting;
        info!(
            "connecting as {} (keep-alive {}s, clean session {})",
            options.client_id,
            keep_alive,
            options.clean_session
        );
        Ok(())
    }

    fn ensure_can_queue(&self) -> CodecResult<()> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => Ok(()),
            _ => Err(MqttError::NotConnected),
        }
    }

    fn allocate_id(&mut self) -> CodecResult<u16> {
        if self.inflight.is_full() {
            return Err(MqttError::QueueFull);
        }
        let inflight = &self.inflight;
        self.ids
            .allocate(|id| inflight.contains(id))
            .ok_or(MqttError::QueueFull)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> CodecResult<Option<u16>> {
        self.ensure_can_queue()?;
        let mut publish = Publish {
            retain,
            ..Publish::new(topic, payload, qos)
        };

        let stage = match qos {
            QoS::AtMostOnce => {
                self.outbox
                    .push(&Packet::Publish(publish), Lane::Normal, false)?;
                return Ok(None);
            }
            QoS::AtLeastOnce => Stage::AwaitPubAck,
            QoS::ExactlyOnce => Stage::AwaitPubRec,
        };

        let packet_id = self.allocate_id()?;
        publish.packet_id = Some(packet_id);
        let frame = self
            .outbox
            .push(&Packet::Publish(publish), Lane::Normal, true)?;
        self.inflight.insert(InflightEntry {
            packet_id,
            qos,
            stage,
            frame,
            retries: 0,
            sent_at: None,
        })?;
        trace!("queued publish to {} (id {})", topic, packet_id);
        Ok(Some(packet_id))
    }

    fn subscribe(&mut self, filter: &str, qos: QoS) -> CodecResult<u16> {
        self.ensure_can_queue()?;
        self.subscriptions.check(filter)?;
        let packet_id = self.allocate_id()?;
        let frame = self.outbox.push(
            &Packet::Subscribe(Subscribe::new(packet_id, filter, qos)),
            Lane::Normal,
            true,
        )?;
        self.inflight.insert(InflightEntry {
            packet_id,
            qos,
            stage: Stage::AwaitSubAck,
            frame,
            retries: 0,
            sent_at: None,
        })?;
        self.subscriptions.track(filter, qos, packet_id)?;
        debug!("subscribing to {} (id {})", filter, packet_id);
        Ok(packet_id)
    }

    fn unsubscribe(&mut self, filter: &str) -> CodecResult<u16> {
        self.ensure_can_queue()?;
        let packet_id = self.allocate_id()?;
        let frame = self.outbox.push(
            &Packet::Unsubscribe(Unsubscribe::new(packet_id, filter)),
            Lane::Normal,
            true,
        )?;
        self.inflight.insert(InflightEntry {
            packet_id,
            qos: QoS::AtLeastOnce,
            stage: Stage::AwaitUnsubAck,
            frame,
            retries: 0,
            sent_at: None,
        })?;
        self.subscriptions.begin_unsubscribe(filter, packet_id);
        debug!("unsubscribing from {} (id {})", filter, packet_id);
        Ok(packet_id)
    }

    fn disconnect(&mut self) -> CodecResult<()> {
        match self.state {
            ConnectionState::Connected => {
                self.outbox.push(&Packet::Disconnect, Lane::Normal, false)?;
                self.state = ConnectionState::Disconnecting;
                info!("disconnecting");
                Ok(())
            }
            ConnectionState::Connecting => {
                self.outbox.remove_kind(PacketType::Connect);
                if let Some(mut staged) = self.staged.take() {
                    staged.close();
                }
                self.close_requested = true;
                self.state = ConnectionState::Disconnected;
                info!("connection attempt abandoned");
                Ok(())
            }
            ConnectionState::Disconnecting => Ok(()),
            ConnectionState::Disconnected | ConnectionState::Error => Err(MqttError::NotConnected),
        }
    }

    fn handle_packet(&mut self, packet: &Packet<'_>) -> CodecResult<Dispatch> {
        match packet {
            Packet::ConnAck(ack) => self.on_connack(ack),
            Packet::Publish(publish) => self.on_publish(publish),
            Packet::PubAck(id) => Ok(match self.complete(*id, Stage::AwaitPubAck) {
                Some(_) => Dispatch::Event(MqttEvent::Published { packet_id: *id }),
                None => unexpected_ack(PacketType::PubAck, *id),
            }),
            Packet::PubRec(id) => self.on_pubrec(*id),
            Packet::PubRel(id) => {
                self.outbox.push(&Packet::PubComp(*id), Lane::Priority, false)?;
                Ok(Dispatch::Release(*id))
            }
            Packet::PubComp(id) => Ok(match self.complete(*id, Stage::AwaitPubComp) {
                Some(_) => Dispatch::Event(MqttEvent::Published { packet_id: *id }),
                None => unexpected_ack(PacketType::PubComp, *id),
            }),
            Packet::SubAck(ack) => Ok(self.on_suback(ack)),
            Packet::UnsubAck(id) => Ok(match self.complete(*id, Stage::AwaitUnsubAck) {
                Some(_) => {
                    self.subscriptions.complete_unsubscribe(*id);
                    Dispatch::Event(MqttEvent::Unsubscribed { packet_id: *id })
                }
                None => unexpected_ack(PacketType::UnsubAck, *id),
            }),
            Packet::PingResp => {
                self.keep_alive.on_ping_response();
                trace!("PINGRESP");
                Ok(Dispatch::Event(MqttEvent::PingResponse))
            }
            other => {
                let kind = other.packet_type();
                error!("broker sent {:?}", kind);
                Err(ProtocolError::UnexpectedPacket(kind as u8).into())
            }
        }
    }

    fn on_connack(&mut self, ack: &ConnAck) -> CodecResult<Dispatch> {
        if self.state != ConnectionState::Connecting {
            return Err(ProtocolError::UnexpectedPacket(PacketType::ConnAck as u8).into());
        }
        if ack.code != ConnectReasonCode::Success {
            error!("connection refused: {:?}", ack.code);
            return Err(MqttError::ConnectionRefused(ack.code));
        }

        self.keep_alive.on_connack();
        self.state = ConnectionState::Connected;
        info!("connected (session present: {})", ack.session_present);
        if !ack.session_present && self.resubscribe {
            self.resubscribe_all();
        }
        Ok(Dispatch::Event(MqttEvent::Connected {
            session_present: ack.session_present,
        }))
    }

    fn resubscribe_all(&mut self) {
        let Self {
            outbox,
            inflight,
            ids,
            subscriptions,
            ..
        } = self;
        for sub in subscriptions.iter_mut().filter(|s| s.is_active()) {
            if inflight.is_full() {
                warn!("in-flight table full, not resubscribing to {}", sub.filter.as_str());
                break;
            }
            let Some(packet_id) = ids.allocate(|id| inflight.contains(id)) else {
                break;
            };
            let packet = Packet::Subscribe(Subscribe::new(packet_id, &sub.filter, sub.requested));
            match outbox.push(&packet, Lane::Normal, true) {
                Ok(frame) => {
                    let _ = inflight.insert(InflightEntry {
                        packet_id,
                        qos: sub.requested,
                        stage: Stage::AwaitSubAck,
                        frame,
                        retries: 0,
                        sent_at: None,
                    });
                    sub.pending = Some(packet_id);
                    debug!("resubscribing to {} (id {})", sub.filter.as_str(), packet_id);
                }
                Err(e) => {
                    warn!("cannot resubscribe to {}: {:?}", sub.filter.as_str(), e.code());
                    break;
                }
            }
        }
    }

    fn on_publish(&mut self, publish: &Publish<'_>) -> CodecResult<Dispatch> {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Disconnecting
        ) {
            return Err(ProtocolError::UnexpectedPacket(PacketType::Publish as u8).into());
        }

        match (publish.qos, publish.packet_id) {
            (QoS::AtMostOnce, _) => Ok(Dispatch::Deliver),
            (QoS::AtLeastOnce, Some(id)) => {
                self.outbox.push(&Packet::PubAck(id), Lane::Priority, false)?;
                Ok(Dispatch::Deliver)
            }
            (QoS::ExactlyOnce, Some(id)) => {
                if self.incoming.contains(id) {
                    debug!("duplicate QoS 2 publish {}, not stored again", id);
                } else {
                    self.incoming.store(id, publish)?;
                }
                self.outbox.push(&Packet::PubRec(id), Lane::Priority, false)?;
                Ok(Dispatch::Nothing)
            }
            _ => Err(ProtocolError::MalformedFrame.into()),
        }
    }

    fn on_pubrec(&mut self, packet_id: u16) -> CodecResult<Dispatch> {
        let Some(entry) = self.inflight.get(packet_id).copied() else {
            return Ok(unexpected_ack(PacketType::PubRec, packet_id));
        };
        match entry.stage {
            Stage::AwaitPubRec => {
                let frame = self
                    .outbox
                    .push(&Packet::PubRel(packet_id), Lane::Priority, true)?;
                self.outbox.release(entry.frame);
                if let Some(entry) = self.inflight.get_mut(packet_id) {
                    entry.stage = Stage::AwaitPubComp;
                    entry.frame = frame;
                    entry.sent_at = None;
                }
                Ok(Dispatch::Nothing)
            }
            Stage::AwaitPubComp => {
                // The broker did not see our PUBREL.
                self.outbox.resend(entry.frame);
                Ok(Dispatch::Nothing)
            }
            _ => Ok(unexpected_ack(PacketType::PubRec, packet_id)),
        }
    }

    fn on_suback(&mut self, ack: &SubAck) -> Dispatch {
        if self.complete(ack.packet_id, Stage::AwaitSubAck).is_none() {
            return unexpected_ack(PacketType::SubAck, ack.packet_id);
        }
        let granted = ack.granted(0);
        if granted.is_none() {
            warn!("subscription {} rejected by broker", ack.packet_id);
        }
        self.subscriptions.confirm(ack.packet_id, granted);
        Dispatch::Event(MqttEvent::Subscribed {
            packet_id: ack.packet_id,
            granted,
        })
    }

    /// Ends the handshake `packet_id` if it is at `stage`, dropping its frame.
    fn complete(&mut self, packet_id: u16, stage: Stage) -> Option<InflightEntry> {
        self.inflight.at_stage(packet_id, stage)?;
        let entry = self.inflight.remove(packet_id)?;
        self.outbox.release(entry.frame);
        Some(entry)
    }

    fn check_deadlines(&mut self, now: Instant) -> CodecResult<()> {
        match self.state {
            ConnectionState::Connecting if self.keep_alive.connack_overdue(now) => {
                error!("no CONNACK within keep-alive interval");
                Err(MqttError::KeepAliveTimeout)
            }
            ConnectionState::Connected => {
                if self.keep_alive.ping_overdue(now) {
                    error!("no PINGRESP within keep-alive interval");
                    return Err(MqttError::KeepAliveTimeout);
                }
                if self.keep_alive.ping_due(now) {
                    match self.outbox.push(&Packet::PingReq, Lane::Priority, false) {
                        Ok(_) => self.keep_alive.on_ping_queued(),
                        Err(e) => warn!("cannot queue PINGREQ: {:?}", e.code()),
                    }
                }
                self.retransmit(now);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn retransmit(&mut self, now: Instant) {
        let Some(interval) = self.retry_interval else {
            return;
        };
        let Self {
            outbox, inflight, ..
        } = self;
        for entry in inflight.iter_mut() {
            let Some(sent_at) = entry.sent_at else {
                continue;
            };
            if now.saturating_duration_since(sent_at) >= interval && outbox.resend(entry.frame) {
                entry.retries = entry.retries.saturating_add(1);
                entry.sent_at = None;
                debug!(
                    "resending packet id {} (retry {})",
                    entry.packet_id,
                    entry.retries
                );
            }
        }
    }

    fn next_chunk(&self, out: &mut [u8]) -> Option<(u32, usize)> {
        let gate = match self.state {
            ConnectionState::Connecting => Gate::ConnectOnly,
            ConnectionState::Connected | ConnectionState::Disconnecting => Gate::All,
            ConnectionState::Disconnected | ConnectionState::Error => return None,
        };
        self.outbox.next_chunk(gate, out)
    }

    fn advance(&mut self, seq: u32, n: usize, now: Instant) {
        self.keep_alive.on_bytes_written(now);
        let Some(written) = self.outbox.advance(seq, n) else {
            return;
        };
        match written.kind {
            PacketType::Connect => self.keep_alive.on_connect_written(now),
            PacketType::PingReq => self.keep_alive.on_ping_written(now),
            PacketType::Disconnect => {
                self.state = ConnectionState::Disconnected;
                self.close_requested = true;
                info!("disconnected");
            }
            _ if written.awaits_ack => self.inflight.mark_sent(written.seq, now),
            _ => {}
        }
    }
}

fn unexpected_ack(kind: PacketType, packet_id: u16) -> Dispatch {
    warn!("ignoring {:?} for unknown packet id {}", kind, packet_id);
    Dispatch::Event(MqttEvent::UnexpectedAck { kind, packet_id })
}
